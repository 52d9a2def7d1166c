//! JSON-lines command session.
//!
//! Reads one [`Request`] per line and writes one [`Response`] per line.
//! Commands run in arrival order. Subscriptions opened with `watch` forward
//! their signals as extra lines tagged with the originating request id until
//! the visitor is removed, the connection is lost, or the session ends.

use std::io;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_access::StatusSubscription;
use vigil_types::config::NotifierConfig;

use crate::api::{Api, Command, Reply, Request, Response, SignalView};

/// Signal lines buffered ahead of the writer.
const SIGNAL_BUFFER: usize = 64;

/// Runs a session until `input` ends or `shutdown` fires.
///
/// Open subscriptions are closed and their pending signals flushed before
/// returning.
///
/// # Errors
///
/// Returns any I/O error from reading `input` or writing `output`.
pub async fn run_session<R, W>(
    api: Api,
    input: R,
    mut output: W,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (signals_tx, mut signals_rx) = mpsc::channel(SIGNAL_BUFFER);
    let watches = shutdown.child_token();
    let mut lines = input.lines();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("shutdown requested, closing session");
                break;
            }
            Some(response) = signals_rx.recv() => write_line(&mut output, &response).await?,
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&api, &line, &signals_tx, &watches).await;
                write_line(&mut output, &response).await?;
            }
        }
    }

    watches.cancel();
    drop(signals_tx);
    while let Some(response) = signals_rx.recv().await {
        write_line(&mut output, &response).await?;
    }
    output.flush().await
}

async fn handle_line(
    api: &Api,
    line: &str,
    signals: &mpsc::Sender<Response>,
    watches: &CancellationToken,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "rejecting malformed request line");
            return Response::malformed(format!("malformed request: {err}"));
        },
    };
    let Request { request_id, command } = request;
    let name = command.name();

    let result = match command {
        Command::Watch { visitor_id } => match api.watch(&visitor_id).await {
            Ok(subscription) => {
                let visitor_id = subscription.visitor_id();
                spawn_forwarder(
                    subscription,
                    request_id,
                    api.notifier_config().clone(),
                    signals.clone(),
                    watches.child_token(),
                );
                Ok(Reply::Watching { visitor_id })
            },
            Err(err) => Err(err),
        },
        command => api.execute(command).await,
    };

    if let Err(err) = &result {
        warn!(command = name, ?request_id, error = %err, code = %err.code(), "command failed");
    } else {
        debug!(command = name, ?request_id, "command succeeded");
    }
    Response::from_result(request_id, result)
}

fn spawn_forwarder(
    mut subscription: StatusSubscription,
    request_id: Option<u64>,
    config: NotifierConfig,
    signals: mpsc::Sender<Response>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let visitor_id = subscription.visitor_id();
        loop {
            let signal = tokio::select! {
                () = cancel.cancelled() => break,
                signal = subscription.next() => signal,
            };
            let Some(signal) = signal else { break };
            let view = SignalView::new(signal, &config);
            let terminal = view.is_terminal();
            if signals.send(Response::signal(request_id, visitor_id, view)).await.is_err() {
                break;
            }
            if terminal {
                break;
            }
        }
        subscription.close().await;
        debug!(visitor_id = %visitor_id, "status forwarding stopped");
    });
}

async fn write_line<W>(output: &mut W, response: &Response) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response).map_err(io::Error::other)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await
}
