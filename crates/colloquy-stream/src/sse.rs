// Server-Sent Events push transport using reqwest-eventsource.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use tracing::debug;

use crate::transport::{PushFrame, PushStream, PushTransport, TransportError};

/// SSE transport. The event source's own retry is disabled: a dropped
/// stream surfaces as an error and the connection controller decides when
/// to reconnect.
#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    http: reqwest::Client,
}

impl SseTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn connect(&self, url: &str) -> Result<PushStream, TransportError> {
        let request = self
            .http
            .get(url)
            .header("accept", "text/event-stream");

        let mut es = request
            .eventsource()
            .map_err(|e| TransportError::Connect(format!("failed to create event source: {e}")))?;
        es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));
        debug!(url, "SSE event source created");

        Ok(stream::unfold(Some(es), next_frame).boxed())
    }
}

/// Pull the next frame from the event source. After the first error the
/// source is closed and the stream ends.
async fn next_frame(
    state: Option<EventSource>,
) -> Option<(Result<PushFrame, TransportError>, Option<EventSource>)> {
    let mut es = state?;
    match es.next().await {
        Some(Ok(Event::Open)) => Some((Ok(PushFrame::Open), Some(es))),
        Some(Ok(Event::Message(msg))) => {
            let frame = PushFrame::Message {
                event: Some(msg.event),
                data: msg.data,
            };
            Some((Ok(frame), Some(es)))
        }
        Some(Err(err)) => {
            es.close();
            Some((Err(map_error(&err)), None))
        }
        None => Some((Err(TransportError::Ended), None)),
    }
}

/// Extract a human-readable error from an SSE error.
fn map_error(err: &reqwest_eventsource::Error) -> TransportError {
    match err {
        reqwest_eventsource::Error::StreamEnded => TransportError::Ended,
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            TransportError::Connect(format!("server returned status {status}"))
        }
        reqwest_eventsource::Error::Transport(e) => {
            TransportError::Stream(format!("network error: {e}"))
        }
        other => TransportError::Stream(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ended_maps_to_ended() {
        assert_eq!(
            map_error(&reqwest_eventsource::Error::StreamEnded),
            TransportError::Ended
        );
    }

    #[tokio::test]
    async fn unreachable_server_yields_error_frame() {
        // Port 9 (discard) on localhost is closed in test environments; the
        // event source reports a transport error instead of retrying.
        let transport = SseTransport::default();
        let mut frames = transport
            .connect("http://127.0.0.1:9/api/debates/x/stream")
            .await
            .expect("event source creation does not touch the network");
        let first = frames.next().await.expect("stream yields an item");
        assert!(first.is_err());
        assert!(frames.next().await.is_none());
    }
}
