// Polling fallback: while the push connection is persistently down, fetch
// the catch-up batch on a fixed interval and feed it through the same
// idempotent append path as live events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_core::normalize::normalize_batch;
use colloquy_core::protocol::ConnectionStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::fetch::TimelineSource;
use crate::protocol::{FeedItem, FeedMessage, FeedSource};

/// Whether the polling fallback should run.
///
/// Requires a live debate, and either an explicitly closed connection or
/// more than `threshold` failed attempts. `connecting` counts like
/// `reconnecting` here: it is the same outage between two attempts.
pub fn should_poll(
    should_stream: bool,
    status: ConnectionStatus,
    retry_count: u32,
    threshold: u32,
) -> bool {
    if !should_stream {
        return false;
    }
    match status {
        ConnectionStatus::Closed => true,
        ConnectionStatus::Reconnecting | ConnectionStatus::Connecting => retry_count > threshold,
        ConnectionStatus::Idle | ConnectionStatus::Connected => false,
    }
}

pub struct PollingController<S: TimelineSource> {
    source: Arc<S>,
    interval: Duration,
    feed_tx: mpsc::Sender<FeedMessage>,
    task: Option<JoinHandle<()>>,
    target: Option<(String, u64)>,
}

impl<S: TimelineSource> PollingController<S> {
    pub fn new(source: Arc<S>, interval: Duration, feed_tx: mpsc::Sender<FeedMessage>) -> Self {
        Self {
            source,
            interval,
            feed_tx,
            task: None,
            target: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Start polling `debate_id`. Already polling the same debate under the
    /// same epoch is a no-op.
    pub fn start(&mut self, debate_id: &str, epoch: u64) {
        if self.is_active()
            && self
                .target
                .as_ref()
                .is_some_and(|(id, e)| id == debate_id && *e == epoch)
        {
            return;
        }
        self.stop();

        info!(debate_id, interval_ms = self.interval.as_millis() as u64, "polling fallback started");
        let source = Arc::clone(&self.source);
        let feed_tx = self.feed_tx.clone();
        let interval = self.interval;
        let id = debate_id.to_string();
        self.task = Some(tokio::spawn(poll_loop(source, id.clone(), epoch, interval, feed_tx)));
        self.target = Some((id, epoch));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
            if let Some((id, _)) = &self.target {
                info!(debate_id = %id, "polling fallback stopped");
            }
        }
        self.target = None;
    }

    /// Start or stop according to `enabled`. Returns whether polling is
    /// active afterwards.
    pub fn sync(&mut self, enabled: bool, debate_id: Option<&str>, epoch: u64) -> bool {
        match (enabled, debate_id) {
            (true, Some(id)) => self.start(id, epoch),
            _ => self.stop(),
        }
        self.is_active()
    }
}

impl<S: TimelineSource> Drop for PollingController<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

async fn poll_loop<S: TimelineSource>(
    source: Arc<S>,
    debate_id: String,
    epoch: u64,
    period: Duration,
    feed_tx: mpsc::Sender<FeedMessage>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so the first fetch
    // happens one full interval after polling starts.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let batch = match source.fetch_timeline(&debate_id).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(debate_id = %debate_id, "catch-up fetch failed, retrying next tick: {e}");
                continue;
            }
        };

        let events = normalize_batch(&batch, Utc::now());
        debug!(debate_id = %debate_id, count = events.len(), "catch-up batch fetched");
        for event in events {
            let msg = FeedMessage::new(FeedSource::Poll, epoch, FeedItem::Event(event));
            if feed_tx.send(msg).await.is_err() {
                return;
            }
        }
    }
}
