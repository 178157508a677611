// Push transport seam. A transport turns a url into a stream of raw text
// frames; decoding, normalization and reconnection happen above it.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// One item delivered by a push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushFrame {
    /// The connection is established. Always the first frame of a stream.
    Open,
    /// A text frame. `event` is the SSE event name, when the transport has one.
    Message { event: Option<String>, data: String },
}

impl PushFrame {
    /// Unnamed text frame.
    pub fn text(data: impl Into<String>) -> Self {
        PushFrame::Message {
            event: None,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection error: {0}")]
    Stream(String),

    #[error("server closed the connection{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed(Option<String>),

    #[error("stream ended")]
    Ended,
}

/// Frames from one live connection. Any `Err` item ends the connection; the
/// controller drops the stream and schedules a reconnect.
pub type PushStream = BoxStream<'static, Result<PushFrame, TransportError>>;

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Open a push connection to `url`.
    async fn connect(&self, url: &str) -> Result<PushStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_error_message_includes_reason() {
        assert_eq!(
            TransportError::Closed(Some("going away".into())).to_string(),
            "server closed the connection: going away"
        );
        assert_eq!(
            TransportError::Closed(None).to_string(),
            "server closed the connection"
        );
    }
}
