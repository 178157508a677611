// Library root for the live streaming layer: push transports (SSE and
// WebSocket), the catch-up fetcher, the reconnecting connection controller,
// the polling fallback and the per-debate session loop that ties them to a
// timeline.

pub mod backoff;
pub mod connection;
pub mod fetch;
pub mod memory;
pub mod polling;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod transport;
pub mod ws;
