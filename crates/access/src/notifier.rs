//! Status notifier.
//!
//! One [`StatusSubscription`] per connected client, scoped to one visitor.
//! A background task owns the store subscription and forwards genuine
//! status flips to the client as [`NotifierSignal`]s.
//!
//! # Delivery Rules
//!
//! - The status at subscription time is a baseline and is never delivered.
//! - Each flip is delivered once. A flip whose new status equals the last
//!   delivered (or baseline) status is dropped, which deduplicates across
//!   reconnects.
//! - A failed or closed store subscription is re-established after a fixed
//!   delay. A status change that happened while disconnected is delivered as
//!   a synthesized event from the fresh snapshot.
//! - An independent liveness probe compares the stored status with the last
//!   delivered one and restarts the subscription at once on divergence. It
//!   also restarts a subscription that stayed quiet for a whole interval once
//!   the store reports it no longer feeds it. Both catch subscriptions that
//!   went silent without erroring.
//! - After `max_reconnect_attempts` consecutive failed reconnects the task
//!   sends [`NotifierSignal::ConnectionLost`] and stops.
//!
//! Dropping or closing the subscription cancels the task, which releases the
//! store subscription.

use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_store::{StatusEventStream, StoreGateway, VisitorWatch, WatchLiveness};
use vigil_types::{
    ErrorCode, Result, StatusChangeEvent, VisitorId, VisitorStatus, config::NotifierConfig,
};

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierSignal {
    /// The visitor's status flipped.
    StatusChanged(StatusChangeEvent),
    /// Reconnection gave up. No further signals follow.
    ConnectionLost {
        /// Consecutive reconnect attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
    /// The visitor was purged. No further signals follow.
    VisitorRemoved,
}

/// Where the client is sent after a flip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RedirectTarget {
    /// The ban notice view, carrying the ban reason.
    BanNotice {
        /// View path.
        path: String,
        /// Ban reason to display.
        reason: Option<String>,
    },
    /// The normal entry point.
    Entry {
        /// View path.
        path: String,
    },
}

/// Countdown and destination for a client that observed a flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPlan {
    /// Countdown shown before redirecting.
    pub delay: Duration,
    /// Redirect destination.
    pub target: RedirectTarget,
}

impl RedirectPlan {
    /// Plans the redirect for `event`.
    #[must_use]
    pub fn for_event(event: &StatusChangeEvent, config: &NotifierConfig) -> Self {
        let target = match event.new_status {
            VisitorStatus::Banned => RedirectTarget::BanNotice {
                path: config.ban_notice_path.clone(),
                reason: event.reason.clone(),
            },
            VisitorStatus::Active => RedirectTarget::Entry { path: config.entry_path.clone() },
        };
        Self { delay: config.redirect_delay, target }
    }
}

/// Creates per-visitor subscriptions.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    gateway: StoreGateway,
    config: NotifierConfig,
}

impl StatusNotifier {
    /// Creates a notifier.
    pub fn new(gateway: StoreGateway, config: NotifierConfig) -> Self {
        Self { gateway, config }
    }

    /// Returns the notifier configuration.
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Subscribes to status flips of `visitor_id`.
    ///
    /// The initial store subscription is taken before returning, so an
    /// unknown visitor or an unreachable store fails here.
    ///
    /// # Errors
    ///
    /// `VisitorNotFound`, or store failures after retries.
    pub async fn watch(&self, visitor_id: VisitorId) -> Result<StatusSubscription> {
        let initial = self.gateway.watch_visitor(visitor_id).await?;
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();

        let task = WatchTask {
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            visitor_id,
            sender,
            cancel: cancel.clone(),
        };
        debug!(visitor_id = %visitor_id, baseline = %initial.snapshot.status, "status watch started");
        let handle = tokio::spawn(task.run(initial));

        Ok(StatusSubscription { visitor_id, receiver, cancel, task: Some(handle) })
    }
}

/// A live subscription owned by one client.
///
/// Implements [`Stream`]. The stream ends after a terminal signal or once
/// the subscription is closed.
#[derive(Debug)]
pub struct StatusSubscription {
    visitor_id: VisitorId,
    receiver: mpsc::Receiver<NotifierSignal>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusSubscription {
    /// Visitor this subscription follows.
    pub fn visitor_id(&self) -> VisitorId {
        self.visitor_id
    }

    /// Waits for the next signal. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<NotifierSignal> {
        self.receiver.recv().await
    }

    /// Cancels the subscription and waits until its store subscription is released.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(visitor_id = %self.visitor_id, error = %err, "status watch task failed");
        }
    }
}

impl Stream for StatusSubscription {
    type Item = NotifierSignal;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Why the event pump stopped.
enum Interruption {
    /// The stream yielded an error.
    Failed(String),
    /// The store ended the stream.
    Closed,
    /// The liveness probe saw a status the stream never reported.
    Diverged(VisitorStatus),
    /// The stream stayed quiet and the store no longer feeds it.
    Abandoned,
}

struct WatchTask {
    gateway: StoreGateway,
    config: NotifierConfig,
    visitor_id: VisitorId,
    sender: mpsc::Sender<NotifierSignal>,
    cancel: CancellationToken,
}

impl WatchTask {
    async fn run(self, initial: VisitorWatch) {
        let mut last = initial.snapshot.status;
        let mut events = initial.events;
        let mut liveness = initial.liveness;

        loop {
            let interruption = match self.pump(&mut events, &liveness, &mut last).await {
                Some(interruption) => interruption,
                None => break,
            };
            let immediate = match interruption {
                Interruption::Failed(error) => {
                    warn!(visitor_id = %self.visitor_id, %error, "status watch failed");
                    false
                },
                Interruption::Closed => {
                    debug!(visitor_id = %self.visitor_id, "status watch closed by store");
                    false
                },
                Interruption::Diverged(stored) => {
                    warn!(
                        visitor_id = %self.visitor_id,
                        delivered = %last,
                        %stored,
                        "status watch went silent, restarting"
                    );
                    true
                },
                Interruption::Abandoned => {
                    warn!(visitor_id = %self.visitor_id, "status watch abandoned by store, restarting");
                    true
                },
            };
            match self.reconnect(&mut last, immediate).await {
                Some(fresh) => {
                    events = fresh.events;
                    liveness = fresh.liveness;
                },
                None => break,
            }
        }
        debug!(visitor_id = %self.visitor_id, "status watch stopped");
    }

    /// Forwards flips until the stream is interrupted. `None` means stop.
    async fn pump(
        &self,
        events: &mut StatusEventStream,
        liveness: &WatchLiveness,
        last: &mut VisitorStatus,
    ) -> Option<Interruption> {
        let period = self.config.liveness_interval;
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_heard = Instant::now();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        last_heard = Instant::now();
                        if event.new_status == *last {
                            debug!(visitor_id = %self.visitor_id, status = %event.new_status, "dropping duplicate flip");
                            continue;
                        }
                        *last = event.new_status;
                        if !self.deliver(NotifierSignal::StatusChanged(event)).await {
                            return None;
                        }
                    },
                    Some(Err(err)) => return Some(Interruption::Failed(err.to_string())),
                    None => return Some(Interruption::Closed),
                },
                _ = ticks.tick() => match self.gateway.get_visitor(self.visitor_id).await {
                    Ok(Some(visitor)) if visitor.status != *last => {
                        return Some(Interruption::Diverged(visitor.status));
                    },
                    Ok(Some(_)) => {
                        if last_heard.elapsed() >= period && !liveness.is_live() {
                            return Some(Interruption::Abandoned);
                        }
                    },
                    Ok(None) => {
                        self.deliver(NotifierSignal::VisitorRemoved).await;
                        return None;
                    },
                    Err(err) => {
                        warn!(visitor_id = %self.visitor_id, error = %err, "liveness probe failed");
                    },
                },
            }
        }
    }

    /// Re-establishes the store subscription. `None` means stop.
    ///
    /// The returned watch has its snapshot already folded into `last`.
    async fn reconnect(&self, last: &mut VisitorStatus, immediate: bool) -> Option<VisitorWatch> {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempts = 0u32;
        let mut last_error = String::new();

        while attempts < max_attempts {
            if !(immediate && attempts == 0) && !self.pause(self.config.reconnect_delay).await {
                return None;
            }
            attempts += 1;

            match self.gateway.watch_visitor(self.visitor_id).await {
                Ok(watch) => {
                    info!(visitor_id = %self.visitor_id, attempts, "status watch reconnected");
                    if watch.snapshot.status != *last {
                        let event = StatusChangeEvent {
                            visitor_id: self.visitor_id,
                            previous_status: *last,
                            new_status: watch.snapshot.status,
                            reason: watch.snapshot.reason.clone(),
                            timestamp: Utc::now(),
                        };
                        *last = event.new_status;
                        if !self.deliver(NotifierSignal::StatusChanged(event)).await {
                            return None;
                        }
                    }
                    return Some(watch);
                },
                Err(err) if err.code() == ErrorCode::VisitorNotFound => {
                    info!(visitor_id = %self.visitor_id, "watched visitor was removed");
                    self.deliver(NotifierSignal::VisitorRemoved).await;
                    return None;
                },
                Err(err) => {
                    warn!(
                        visitor_id = %self.visitor_id,
                        attempt = attempts,
                        max_attempts,
                        error = %err,
                        "status watch reconnect failed"
                    );
                    last_error = err.to_string();
                },
            }
        }

        warn!(visitor_id = %self.visitor_id, attempts, "status watch connection lost");
        self.deliver(NotifierSignal::ConnectionLost { attempts, last_error }).await;
        None
    }

    /// Sleeps unless cancelled first. Returns false if cancelled.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(delay) => true,
        }
    }

    /// Sends a signal. Returns false if the subscriber is gone or cancelled.
    async fn deliver(&self, signal: NotifierSignal) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = self.sender.send(signal) => sent.is_ok(),
        }
    }
}
