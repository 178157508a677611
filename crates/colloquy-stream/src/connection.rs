// Connection controller: keeps one push connection alive for the current
// debate, reconnecting with table-driven backoff, and forwards normalized
// events into the session feed.
//
// State machine:
//
//   idle --configure(url)--> connecting --open--> connected
//   connected/connecting --error--> reconnecting --delay--> connecting
//   any --close()--> closed        any --disable()--> idle

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_core::normalize::normalize_frame;
use colloquy_core::protocol::ConnectionStatus;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::protocol::{FeedItem, FeedMessage, FeedSource};
use crate::transport::{PushFrame, PushStream, PushTransport, TransportError};

/// Observable controller state, published through a `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive failed attempts since the last successful open.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Delay before the pending reconnect, while one is scheduled.
    pub next_retry: Option<Duration>,
    /// Identifies the driver task allowed to write this state.
    pub(crate) run: u64,
}

pub struct ConnectionController<T: PushTransport> {
    transport: Arc<T>,
    policy: BackoffPolicy,
    feed_tx: mpsc::Sender<FeedMessage>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    url: Option<String>,
    epoch: u64,
    run: u64,
    task: Option<JoinHandle<()>>,
}

impl<T: PushTransport> ConnectionController<T> {
    pub fn new(transport: Arc<T>, policy: BackoffPolicy, feed_tx: mpsc::Sender<FeedMessage>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            transport,
            policy,
            feed_tx,
            state_tx: Arc::new(state_tx),
            url: None,
            epoch: 0,
            run: 0,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// A driver task is running (connecting, connected or waiting to retry).
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Point the controller at `url`. With no url or `enabled == false` the
    /// controller is disabled. Re-configuring the url and epoch it is already
    /// running for is a no-op; anything else starts fresh with a zero attempt
    /// count.
    pub fn configure(&mut self, url: Option<&str>, enabled: bool, epoch: u64) {
        let url = match url {
            Some(url) if enabled => url,
            _ => {
                self.disable();
                return;
            }
        };

        if self.is_active() && self.url.as_deref() == Some(url) && self.epoch == epoch {
            return;
        }

        self.url = Some(url.to_string());
        self.epoch = epoch;
        self.start();
    }

    /// Manual retry: reconnect to the current url immediately, attempt count
    /// reset. Does nothing when no url is configured.
    pub fn retry(&mut self) {
        if self.url.is_none() {
            return;
        }
        info!("manual reconnect requested");
        self.start();
    }

    /// Cancel any pending reconnect, drop the live connection and report
    /// `closed`. Idempotent.
    pub fn close(&mut self) {
        self.stop_task();
        self.state_tx.send_if_modified(|state| {
            let closed = ConnectionState {
                status: ConnectionStatus::Closed,
                next_retry: None,
                run: self.run,
                ..state.clone()
            };
            replace_if_changed(state, closed)
        });
    }

    /// Close and forget the url: status `idle`, attempt count cleared.
    pub fn disable(&mut self) {
        self.stop_task();
        self.url = None;
        let idle = ConnectionState {
            run: self.run,
            ..ConnectionState::default()
        };
        self.state_tx
            .send_if_modified(|state| replace_if_changed(state, idle));
    }

    fn start(&mut self) {
        self.stop_task();
        let Some(url) = self.url.clone() else {
            return;
        };

        let run = self.run;
        self.state_tx.send_replace(ConnectionState {
            status: ConnectionStatus::Connecting,
            run,
            ..ConnectionState::default()
        });

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            policy: self.policy.clone(),
            feed_tx: self.feed_tx.clone(),
            state_tx: Arc::clone(&self.state_tx),
            url,
            epoch: self.epoch,
            run,
        };
        info!(url = %driver.url, epoch = self.epoch, "starting push connection");
        self.task = Some(tokio::spawn(driver.run()));
    }

    /// Abort the driver and invalidate its run id so that nothing it does
    /// after this point can touch the published state.
    fn stop_task(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
            debug!(run = self.run, "push connection task aborted");
            self.run += 1;
        }
    }
}

impl<T: PushTransport> Drop for ConnectionController<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

fn replace_if_changed(state: &mut ConnectionState, next: ConnectionState) -> bool {
    if *state == next {
        return false;
    }
    *state = next;
    true
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

/// How a single connection ended.
enum Outcome {
    /// The session stopped listening; the driver should exit.
    FeedClosed,
    Failed(TransportError),
}

struct Driver<T: PushTransport> {
    transport: Arc<T>,
    policy: BackoffPolicy,
    feed_tx: mpsc::Sender<FeedMessage>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    url: String,
    epoch: u64,
    run: u64,
}

impl<T: PushTransport> Driver<T> {
    /// Connect, pump, back off, repeat. Runs until aborted or until the feed
    /// receiver goes away.
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                self.publish(|s| {
                    s.status = ConnectionStatus::Connecting;
                    s.next_retry = None;
                });
            }

            let outcome = match self.transport.connect(&self.url).await {
                Ok(stream) => self.pump(stream, &mut attempt).await,
                Err(err) => Outcome::Failed(err),
            };

            let err = match outcome {
                Outcome::FeedClosed => {
                    debug!(url = %self.url, "feed closed, push connection exiting");
                    return;
                }
                Outcome::Failed(err) => err,
            };

            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay_for(attempt);
            let message = err.to_string();
            warn!(
                url = %self.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "push connection failed: {message}"
            );

            if self.send(FeedItem::TransportError(message.clone())).await.is_err() {
                return;
            }
            self.publish(|s| {
                s.status = ConnectionStatus::Reconnecting;
                s.attempt_count = attempt;
                s.last_error = Some(message);
                s.next_retry = Some(delay);
            });

            tokio::time::sleep(delay).await;
        }
    }

    /// Forward frames from one live connection until it fails.
    async fn pump(&self, mut stream: PushStream, attempt: &mut u32) -> Outcome {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(PushFrame::Open) => {
                    info!(url = %self.url, "push connection open");
                    *attempt = 0;
                    self.publish(|s| {
                        s.status = ConnectionStatus::Connected;
                        s.attempt_count = 0;
                        s.last_error = None;
                        s.next_retry = None;
                    });
                }
                Ok(PushFrame::Message { event, data }) => {
                    match normalize_frame(event.as_deref(), &data, Utc::now()) {
                        Ok(events) => {
                            for event in events {
                                if self.send(FeedItem::Event(event)).await.is_err() {
                                    return Outcome::FeedClosed;
                                }
                            }
                        }
                        Err(err) => {
                            debug!(%err, "dropping malformed frame");
                            if self.send(FeedItem::Malformed(err.to_string())).await.is_err() {
                                return Outcome::FeedClosed;
                            }
                        }
                    }
                }
                Err(err) => return Outcome::Failed(err),
            }
        }
        Outcome::Failed(TransportError::Ended)
    }

    async fn send(&self, item: FeedItem) -> Result<(), mpsc::error::SendError<FeedMessage>> {
        self.feed_tx
            .send(FeedMessage::new(FeedSource::Push, self.epoch, item))
            .await
    }

    /// Apply `update` unless a newer run has taken over the state.
    fn publish(&self, update: impl FnOnce(&mut ConnectionState)) {
        self.state_tx.send_if_modified(|state| {
            if state.run != self.run {
                return false;
            }
            let before = state.clone();
            update(state);
            *state != before
        });
    }
}
