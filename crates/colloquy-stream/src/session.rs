// Debate session: the per-view orchestrator. Owns the timeline, the
// connection controller and the polling fallback for one debate at a time,
// and runs the event loop that reconciles them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colloquy_core::config::{Config, ServerConfig};
use colloquy_core::event::CanonicalEvent;
use colloquy_core::normalize::normalize_batch;
use colloquy_core::protocol::{ConnectionStatus, ConnectionView, DebateInfo, DebateStatus};
use colloquy_core::timeline::Timeline;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::connection::{ConnectionController, ConnectionState};
use crate::fetch::TimelineSource;
use crate::polling::{should_poll, PollingController};
use crate::protocol::{FeedItem, FeedMessage, FeedSource, SessionCommand, SessionSnapshot, UiUpdate};
use crate::transport::PushTransport;

/// Feed channel capacity. Producers wait when the session falls behind.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub server: ServerConfig,
    pub backoff: BackoffPolicy,
    pub poll_interval: Duration,
    /// Failed attempts tolerated before polling starts and the connection
    /// is reported unstable.
    pub retry_threshold: u32,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            backoff: BackoffPolicy::from_config(&config.reconnect),
            poll_interval: config.polling.interval(),
            retry_threshold: config.polling.retry_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// DebateSession
// ---------------------------------------------------------------------------

pub struct DebateSession<T: PushTransport, S: TimelineSource> {
    settings: SessionSettings,
    source: Arc<S>,
    connection: ConnectionController<T>,
    polling: PollingController<S>,
    timeline: Timeline,
    feed_tx: mpsc::Sender<FeedMessage>,
    ui_tx: mpsc::Sender<UiUpdate>,

    debate_id: Option<String>,
    debate: Option<DebateInfo>,

    /// Bumped on every teardown. Producers stamp their messages with the
    /// epoch they were started under; anything older is discarded.
    epoch: u64,
    should_stream: bool,
    /// The push connection was closed by the user and stays closed until
    /// `Retry` or the next `Open`.
    paused: bool,
    load_task: Option<JoinHandle<()>>,
    view: ConnectionView,
}

impl<T: PushTransport, S: TimelineSource> DebateSession<T, S> {
    /// Build a session. The returned receiver is the feed every producer
    /// writes into; hand it to [`run`].
    pub fn new(
        settings: SessionSettings,
        transport: Arc<T>,
        source: Arc<S>,
        ui_tx: mpsc::Sender<UiUpdate>,
    ) -> (Self, mpsc::Receiver<FeedMessage>) {
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
        let connection = ConnectionController::new(transport, settings.backoff.clone(), feed_tx.clone());
        let polling = PollingController::new(Arc::clone(&source), settings.poll_interval, feed_tx.clone());

        let session = Self {
            settings,
            source,
            connection,
            polling,
            timeline: Timeline::new(),
            feed_tx,
            ui_tx,
            debate_id: None,
            debate: None,
            epoch: 0,
            should_stream: false,
            paused: false,
            load_task: None,
            view: ConnectionView::default(),
        };
        (session, feed_rx)
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn debate_id(&self) -> Option<&str> {
        self.debate_id.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn should_stream(&self) -> bool {
        self.should_stream
    }

    pub fn is_polling(&self) -> bool {
        self.polling.is_active()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection state changes; the event loop reconciles on each one.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn connection_view(&self) -> ConnectionView {
        self.view
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let timeline = self.timeline.snapshot();
        SessionSnapshot {
            debate_id: self.debate_id.clone(),
            prompt: self.debate.as_ref().and_then(|d| d.prompt.clone()),
            status: timeline.status,
            events: timeline.events,
            last_error: timeline.last_error,
            is_recovering: timeline.is_recovering,
            connection: self.view,
            vote: self.debate.as_ref().and_then(|d| d.vote.clone()),
        }
    }

    // -- commands --

    pub async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Open { debate_id } => self.open(debate_id).await,
            SessionCommand::Close => self.close_connection().await,
            SessionCommand::Retry => self.retry().await,
            SessionCommand::Quit => self.shutdown().await,
        }
    }

    /// Show `debate_id`: tear down the current debate, then fetch the new
    /// one's resource and history in the background.
    pub async fn open(&mut self, debate_id: String) {
        self.teardown();
        info!(debate_id = %debate_id, epoch = self.epoch, "opening debate");
        self.debate_id = Some(debate_id.clone());
        self.spawn_load(debate_id);
        self.publish_view().await;
        self.publish_snapshot().await;
    }

    async fn close_connection(&mut self) {
        if self.debate_id.is_none() {
            return;
        }
        info!("push connection closed by user");
        self.paused = true;
        self.connection.close();
        self.reconcile().await;
    }

    async fn retry(&mut self) {
        if self.debate_id.is_none() {
            return;
        }
        self.paused = false;
        if self.should_stream && self.connection.url().is_some() {
            self.connection.retry();
        }
        self.reconcile().await;
    }

    /// Tear down and publish the empty state.
    pub async fn shutdown(&mut self) {
        self.teardown();
        self.publish_view().await;
        self.publish_snapshot().await;
    }

    /// Release everything tied to the current debate. Order matters: the
    /// producers are stopped before the epoch moves on, and the timeline is
    /// reset last so nothing can write into it afterwards.
    fn teardown(&mut self) {
        self.connection.disable();
        self.polling.stop();
        if let Some(handle) = self.load_task.take() {
            handle.abort();
        }
        self.epoch += 1;
        self.timeline.reset();

        self.debate_id = None;
        self.debate = None;
        self.should_stream = false;
        self.paused = false;
        debug!(epoch = self.epoch, "session torn down");
    }

    fn spawn_load(&mut self, debate_id: String) {
        let source = Arc::clone(&self.source);
        let feed_tx = self.feed_tx.clone();
        let epoch = self.epoch;

        self.load_task = Some(tokio::spawn(async move {
            let send = |item| feed_tx.send(FeedMessage::new(FeedSource::Load, epoch, item));

            let debate = match source.fetch_debate(&debate_id).await {
                Ok(debate) => Some(debate),
                Err(e) => {
                    warn!(debate_id = %debate_id, "failed to load debate: {e}");
                    let _ = send(FeedItem::FetchFailed(format!("failed to load debate: {e}"))).await;
                    None
                }
            };

            let events = match source.fetch_timeline(&debate_id).await {
                Ok(batch) => normalize_batch(&batch, Utc::now()),
                Err(e) => {
                    warn!(debate_id = %debate_id, "failed to load timeline: {e}");
                    let _ = send(FeedItem::FetchFailed(format!("failed to load timeline: {e}"))).await;
                    Vec::new()
                }
            };

            let _ = send(FeedItem::Loaded { debate, events }).await;
        }));
    }

    // -- feed --

    pub async fn handle_feed(&mut self, msg: FeedMessage) {
        if msg.epoch != self.epoch {
            debug!(
                "Discarding stale {:?} message (message epoch: {}, current epoch: {})",
                msg.source, msg.epoch, self.epoch
            );
            return;
        }

        match msg.item {
            FeedItem::Event(event) => self.append(event).await,
            FeedItem::TransportError(message) => {
                // Surfaced through the connection status only.
                debug!(%message, "push transport error");
            }
            FeedItem::Malformed(message) | FeedItem::FetchFailed(message) => {
                self.timeline.record_error(message.clone());
                let _ = self.ui_tx.send(UiUpdate::Diagnostic(message)).await;
            }
            FeedItem::Loaded { debate, events } => self.apply_load(debate, events).await,
        }
    }

    async fn append(&mut self, event: CanonicalEvent) {
        let before = self.timeline.status();
        if !self.timeline.append(event.clone()) {
            return;
        }
        let _ = self.ui_tx.send(UiUpdate::EventAppended(event)).await;

        let after = self.timeline.status();
        if after != before {
            let _ = self.ui_tx.send(UiUpdate::Status(after)).await;
            self.reconcile().await;
        }
    }

    async fn apply_load(&mut self, debate: Option<DebateInfo>, events: Vec<CanonicalEvent>) {
        self.load_task = None;

        // Anything the push connection delivered before the load finished is
        // kept; on an id collision the fetched record wins.
        let mut merged = self.timeline.events().to_vec();
        merged.extend(events);
        self.timeline.initialize(merged);

        let resource_status = debate
            .as_ref()
            .map(|d| d.status)
            .unwrap_or_else(|| self.timeline.status());
        let status = if resource_status.is_terminal() {
            resource_status
        } else {
            terminal_status(self.timeline.events()).unwrap_or(resource_status)
        };
        self.timeline.set_status(status);
        self.debate = debate;

        info!(
            debate_id = self.debate_id.as_deref().unwrap_or_default(),
            status = status.label(),
            events = self.timeline.len(),
            "debate loaded"
        );

        self.reconcile().await;
        self.publish_snapshot().await;
    }

    // -- reconciliation --

    /// Re-derive `should_stream`, then bring the connection and the polling
    /// fallback in line with it. Called after every status change and every
    /// connection state change.
    pub async fn reconcile(&mut self) {
        let should_stream = self.debate_id.is_some() && self.timeline.status().should_stream();
        if should_stream != self.should_stream {
            info!(should_stream, status = self.timeline.status().label(), "streaming decision changed");
            self.should_stream = should_stream;
        }

        match self.debate_id.as_deref() {
            Some(id) if should_stream && !self.paused => {
                let url = self.settings.server.stream_url(id);
                self.connection.configure(Some(&url), true, self.epoch);
            }
            _ => {
                if self.connection.is_active() {
                    self.connection.close();
                }
            }
        }

        let state = self.connection.state();
        let poll = should_poll(
            should_stream,
            state.status,
            state.attempt_count,
            self.settings.retry_threshold,
        );
        let was_polling = self.polling.is_active();
        let polling = self.polling.sync(poll, self.debate_id.as_deref(), self.epoch);
        if polling != was_polling {
            self.timeline.set_recovering(polling);
        }

        self.publish_view().await;
    }

    async fn publish_view(&mut self) {
        let state = self.connection.state();
        let view = connection_view(&state, self.polling.is_active(), self.settings.retry_threshold);
        if view != self.view {
            self.view = view;
            let _ = self.ui_tx.send(UiUpdate::Connection(view)).await;
        }
    }

    async fn publish_snapshot(&self) {
        let _ = self
            .ui_tx
            .send(UiUpdate::Snapshot(Box::new(self.snapshot())))
            .await;
    }
}

/// Connection indicator: unstable while polling, or while an outage has
/// outlasted the retry threshold.
pub fn connection_view(state: &ConnectionState, polling: bool, threshold: u32) -> ConnectionView {
    let outage = matches!(
        state.status,
        ConnectionStatus::Reconnecting | ConnectionStatus::Connecting
    ) && state.attempt_count > threshold;
    ConnectionView {
        status: state.status,
        retry_count: state.attempt_count,
        polling,
        unstable: polling || outage,
    }
}

/// Status implied by the most recent terminal event, if any.
fn terminal_status(events: &[CanonicalEvent]) -> Option<DebateStatus> {
    events.iter().rev().find_map(|event| match event {
        CanonicalEvent::Final(_) => Some(DebateStatus::Completed),
        e if e.is_failure() => Some(DebateStatus::Failed),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the session event loop.
///
/// Listens on three sources using `tokio::select!`:
/// 1. Feed messages from the push connection, polling and load tasks
/// 2. Connection state changes
/// 3. Commands from the UI
///
/// Pushes UI updates through the session's `ui_tx`. Returns after `Quit` or
/// when the command channel closes, with everything torn down.
pub async fn run<T, S>(
    mut session: DebateSession<T, S>,
    mut feed_rx: mpsc::Receiver<FeedMessage>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) -> anyhow::Result<()>
where
    T: PushTransport,
    S: TimelineSource,
{
    info!("Debate session loop started");
    let mut conn_rx = session.subscribe_connection();
    let mut conn_open = true;

    loop {
        tokio::select! {
            // --- Producer feed ---
            msg = feed_rx.recv() => {
                match msg {
                    Some(msg) => session.handle_feed(msg).await,
                    None => {
                        info!("Feed channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Connection state (only while the sender is alive) ---
            changed = conn_rx.changed(), if conn_open => {
                match changed {
                    Ok(()) => session.reconcile().await,
                    Err(_) => conn_open = false,
                }
            }

            // --- UI commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(cmd) => session.handle_command(cmd).await,
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
    info!("Debate session loop exiting");
    Ok(())
}
