use fgsim_core::actions::PUSH_ENDPOINT;
use fgsim_core::push::{decode_push, FrameError, DEFAULT_MAX_FRAME_BYTES};
use fgsim_core::PushMsg;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Push(PushMsg),
}

/// `http://host:port` -> `ws://host:port/ws`.
pub fn push_url(base: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?.join(PUSH_ENDPOINT)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    // Only fails for cannot-be-a-base URLs, which `join` already rejected.
    let _ = url.set_scheme(scheme);
    Ok(url)
}

/// Decodes one push frame. Unknown routes and malformed frames are logged and dropped.
pub fn dispatch_frame(bytes: &[u8]) -> Option<PushMsg> {
    match decode_push(bytes, DEFAULT_MAX_FRAME_BYTES) {
        Ok(msg) => Some(msg),
        Err(FrameError::UnknownRoute { kind, subtype }) => {
            warn!(event = "push_unknown_route", r#type = %kind, subtype = %subtype);
            None
        }
        Err(err) => {
            warn!(event = "push_decode_error", error = %err);
            None
        }
    }
}

/// Keeps exactly one push channel open, reconnecting with backoff until `tx` closes.
pub async fn session_loop(url: Url, tx: mpsc::Sender<SessionEvent>) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "push_connect_error", url = %url, error = %err);
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "push_connected", url = %url);
        if tx.send(SessionEvent::Connected).await.is_err() {
            let _ = ws.close(None).await;
            return;
        }

        while let Some(frame) = ws.next().await {
            let msg = match frame {
                Ok(Message::Text(text)) => dispatch_frame(text.as_bytes()),
                Ok(Message::Binary(bytes)) => dispatch_frame(&bytes),
                Ok(Message::Ping(payload)) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                    None
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => None,
                Err(err) => {
                    warn!(event = "push_read_error", error = %err);
                    break;
                }
            };
            if let Some(msg) = msg {
                if tx.send(SessionEvent::Push(msg)).await.is_err() {
                    let _ = ws.close(None).await;
                    return;
                }
            }
        }

        debug!(event = "push_disconnected", url = %url);
        if tx.send(SessionEvent::Disconnected).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

pub fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}
