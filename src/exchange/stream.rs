use super::{Connector, StreamEvent};
use crate::error::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// How a single connection ended
enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Run the connector's streaming session until `shutdown` fires
///
/// Reconnects after `reconnect_delay` on any disconnect and replays the
/// connector's full subscription set on every new connection. Decoded
/// events are forwarded to `events`.
pub async fn run_stream(
    connector: Arc<Connector>,
    events: mpsc::Sender<StreamEvent>,
    shutdown: CancellationToken,
    reconnect_delay: Duration,
) {
    let exchange = connector.kind();

    loop {
        match run_session(&connector, &events, &shutdown).await {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Disconnected) => {
                tracing::warn!(exchange = %exchange, "Stream connection closed");
            }
            Err(err) => {
                tracing::error!(exchange = %exchange, error = %err, "Stream error");
            }
        }
        connector.detach_outbound();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {
                tracing::info!(exchange = %exchange, "Reconnecting stream");
            }
        }
    }

    connector.detach_outbound();
    tracing::info!(exchange = %exchange, "Stream stopped");
}

async fn run_session(
    connector: &Connector,
    events: &mpsc::Sender<StreamEvent>,
    shutdown: &CancellationToken,
) -> Result<SessionEnd> {
    let connect = tokio::select! {
        _ = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
        result = connect_async(connector.stream_url()) => result,
    };
    let (socket, _) = connect?;
    let (mut write, mut read) = socket.split();

    tracing::info!(exchange = %connector.kind(), url = %connector.stream_url(), "Stream connected");

    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
    connector.attach_outbound(tx);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
            Some(text) = outbound.recv() => {
                write.send(Message::text(text)).await?;
            }
            message = read.next() => {
                let Some(message) = message else {
                    return Ok(SessionEnd::Disconnected);
                };
                match message? {
                    Message::Text(text) => {
                        for event in connector.handle_stream_message(text.as_str()) {
                            if events.send(event).await.is_err() {
                                // Nobody is listening any more
                                return Ok(SessionEnd::Shutdown);
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        write.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(frame) => {
                        tracing::debug!(exchange = %connector.kind(), ?frame, "Close frame received");
                        return Ok(SessionEnd::Disconnected);
                    }
                    _ => {}
                }
            }
        }
    }
}
