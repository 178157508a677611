// WebSocket push transport using tokio-tungstenite.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

use crate::transport::{PushFrame, PushStream, PushTransport, TransportError};

#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl PushTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<PushStream, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url, "WebSocket connected");

        // Nothing is ever sent upstream; the write half is dropped.
        let (_write, read) = ws_stream.split();
        Ok(ws_frames(read).boxed())
    }
}

type BoxedMessages = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Map raw WebSocket messages to push frames: `Open` first, then one frame
/// per text message. Binary, ping and pong messages are skipped. A close
/// frame, a read error or the end of the stream yields a final `Err`.
///
/// Generic over the message stream so it can be driven by in-memory streams
/// in tests.
pub fn ws_frames<St>(messages: St) -> impl Stream<Item = Result<PushFrame, TransportError>> + Send
where
    St: Stream<Item = Result<Message, WsError>> + Send + 'static,
{
    let messages: BoxedMessages = Box::pin(messages);
    let frames = stream::unfold(Some(messages), |state| async move {
        let mut messages = state?;
        loop {
            match messages.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some((Ok(PushFrame::text(text.as_str())), Some(messages)));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    info!(?reason, "server sent close frame");
                    return Some((Err(TransportError::Closed(reason)), None));
                }
                Some(Err(e)) => {
                    return Some((Err(TransportError::Stream(e.to_string())), None));
                }
                None => return Some((Err(TransportError::Ended), None)),
                Some(Ok(other)) => {
                    // Binary, Ping, Pong, Frame.
                    debug!(len = other.len(), "ignoring non-text WebSocket message");
                }
            }
        }
    });

    stream::once(future::ready(Ok(PushFrame::Open))).chain(frames)
}
