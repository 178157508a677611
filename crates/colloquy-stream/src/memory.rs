// In-memory transport and timeline source. Used by the integration tests
// and by the `--demo` mode of colloquy-watch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_core::protocol::DebateInfo;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::fetch::{FetchError, TimelineSource};
use crate::transport::{PushFrame, PushStream, PushTransport, TransportError};

// ---------------------------------------------------------------------------
// ScriptedTransport
// ---------------------------------------------------------------------------

/// What one `connect` call does.
#[derive(Debug, Clone)]
pub enum ScriptedConnection {
    /// Fail to connect.
    Refuse(String),
    /// Open, deliver the frames with `pace` before each, then end with `end`
    /// or, when it is `None`, stay open forever.
    Deliver {
        frames: Vec<PushFrame>,
        pace: Duration,
        end: Option<TransportError>,
    },
}

impl ScriptedConnection {
    pub fn refuse(reason: impl Into<String>) -> Self {
        ScriptedConnection::Refuse(reason.into())
    }

    /// Deliver text frames, then keep the connection open.
    pub fn live<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedConnection::Deliver {
            frames: frames.into_iter().map(PushFrame::text).collect(),
            pace: Duration::ZERO,
            end: None,
        }
    }

    /// Deliver text frames, then drop the connection.
    pub fn dropped<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedConnection::Deliver {
            frames: frames.into_iter().map(PushFrame::text).collect(),
            pace: Duration::ZERO,
            end: Some(TransportError::Ended),
        }
    }

    /// Space consecutive frames `pace` apart.
    pub fn paced(self, pace: Duration) -> Self {
        match self {
            ScriptedConnection::Deliver { frames, end, .. } => {
                ScriptedConnection::Deliver { frames, pace, end }
            }
            refuse => refuse,
        }
    }
}

/// Replays a script of connections, one per `connect` call. Once the script
/// is exhausted every further attempt hangs without opening.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedConnection>>,
    attempts: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = ScriptedConnection>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, connection: ScriptedConnection) {
        lock(&self.script).push_back(connection);
    }

    /// Url and time of every `connect` call so far.
    pub fn attempts(&self) -> Vec<(String, Instant)> {
        lock(&self.attempts).clone()
    }

    pub fn attempt_count(&self) -> usize {
        lock(&self.attempts).len()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<PushStream, TransportError> {
        lock(&self.attempts).push((url.to_string(), Instant::now()));
        let next = lock(&self.script).pop_front();

        match next {
            None => Ok(stream::pending().boxed()),
            Some(ScriptedConnection::Refuse(reason)) => Err(TransportError::Connect(reason)),
            Some(ScriptedConnection::Deliver { frames, pace, end }) => {
                let opened = stream::once(async { Ok(PushFrame::Open) });
                let body = stream::iter(frames).then(move |frame| async move {
                    if !pace.is_zero() {
                        tokio::time::sleep(pace).await;
                    }
                    Ok(frame)
                });
                let tail = match end {
                    Some(err) => stream::once(async move { Err(err) }).boxed(),
                    None => stream::pending().boxed(),
                };
                Ok(opened.chain(body).chain(tail).boxed())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StaticSource
// ---------------------------------------------------------------------------

/// Serves a fixed debate resource and a mutable catch-up batch.
#[derive(Debug)]
pub struct StaticSource {
    debate: Mutex<Option<DebateInfo>>,
    timeline: Mutex<Vec<Value>>,
    failing: Mutex<bool>,
    timeline_fetches: Mutex<usize>,
}

impl StaticSource {
    pub fn new(debate: DebateInfo, timeline: Vec<Value>) -> Self {
        Self {
            debate: Mutex::new(Some(debate)),
            timeline: Mutex::new(timeline),
            failing: Mutex::new(false),
            timeline_fetches: Mutex::new(0),
        }
    }

    /// A source whose debate resource does not exist.
    pub fn missing() -> Self {
        let source = Self::new(DebateInfo::default(), Vec::new());
        *lock(&source.debate) = None;
        source
    }

    pub fn set_timeline(&self, timeline: Vec<Value>) {
        *lock(&self.timeline) = timeline;
    }

    pub fn push_item(&self, item: Value) {
        lock(&self.timeline).push(item);
    }

    pub fn set_debate(&self, debate: DebateInfo) {
        *lock(&self.debate) = Some(debate);
    }

    /// Make every fetch fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn timeline_fetches(&self) -> usize {
        *lock(&self.timeline_fetches)
    }

    fn check_available(&self) -> Result<(), FetchError> {
        if *lock(&self.failing) {
            return Err(FetchError::Unavailable("source unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TimelineSource for StaticSource {
    async fn fetch_timeline(&self, _debate_id: &str) -> Result<Vec<Value>, FetchError> {
        *lock(&self.timeline_fetches) += 1;
        self.check_available()?;
        Ok(lock(&self.timeline).clone())
    }

    async fn fetch_debate(&self, debate_id: &str) -> Result<DebateInfo, FetchError> {
        self.check_available()?;
        lock(&self.debate)
            .clone()
            .ok_or_else(|| FetchError::Unavailable(format!("debate {debate_id} not found")))
    }
}

/// Poisoning only happens if a holder panicked; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
