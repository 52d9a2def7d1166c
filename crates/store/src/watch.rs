//! Broadcast-backed status event streams.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use vigil_types::{Result, StatusChangeEvent, VigilError, VisitorId};

use crate::document::StatusEventStream;

/// Wraps a broadcast receiver as a [`StatusEventStream`] for one visitor.
///
/// A lagged receiver has dropped events, so lag surfaces as an error item
/// rather than being skipped. The stream ends when the sender is dropped.
pub fn event_stream(
    visitor_id: VisitorId,
    receiver: broadcast::Receiver<StatusChangeEvent>,
) -> StatusEventStream {
    BroadcastStream::new(receiver)
        .filter_map(move |result| async move {
            match result {
                Ok(event) if event.visitor_id == visitor_id => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    Some(Err(VigilError::StoreUnavailable {
                        message: format!("watch for {visitor_id} lagged by {missed} events"),
                    }))
                },
            }
        })
        .boxed()
}

/// Runs `release` once `events` has been dropped.
///
/// The wrapped stream, and with it its receiver, is dropped before `release`
/// runs, so the release sees the subscription already gone.
pub fn with_release(
    events: StatusEventStream,
    release: impl FnOnce() + Send + 'static,
) -> StatusEventStream {
    ReleaseOnDrop { events: Some(events), release: Some(Box::new(release)) }.boxed()
}

struct ReleaseOnDrop {
    events: Option<StatusEventStream>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Stream for ReleaseOnDrop {
    type Item = Result<StatusChangeEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().events.as_mut() {
            Some(events) => events.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        drop(self.events.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
