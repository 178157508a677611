// Message types flowing between the producers (push connection, polling
// ticker, load task), the session loop, and the UI consumer.

use colloquy_core::aggregate::Aggregates;
use colloquy_core::event::CanonicalEvent;
use colloquy_core::protocol::{ConnectionView, DebateInfo, DebateStatus, VoteSummary};

// ---------------------------------------------------------------------------
// Producer -> session
// ---------------------------------------------------------------------------

/// Which producer a feed message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Push,
    Poll,
    Load,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// A normalized event, to be appended to the timeline.
    Event(CanonicalEvent),
    /// The push connection failed and will be retried.
    TransportError(String),
    /// A frame that could not be decoded. Non-fatal.
    Malformed(String),
    /// The initial fetch of the debate resource or catch-up batch failed.
    FetchFailed(String),
    /// Initial load finished.
    Loaded {
        debate: Option<DebateInfo>,
        events: Vec<CanonicalEvent>,
    },
}

/// Envelope stamped with the session epoch that was current when the
/// producer was started. The session drops messages from older epochs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub source: FeedSource,
    pub epoch: u64,
    pub item: FeedItem,
}

impl FeedMessage {
    pub fn new(source: FeedSource, epoch: u64, item: FeedItem) -> Self {
        FeedMessage {
            source,
            epoch,
            item,
        }
    }
}

// ---------------------------------------------------------------------------
// UI -> session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Show a debate, tearing down whatever was shown before.
    Open { debate_id: String },
    /// Stop the push connection. Polling takes over while the debate is live.
    Close,
    /// Manual retry: reconnect immediately with a fresh attempt count.
    Retry,
    Quit,
}

// ---------------------------------------------------------------------------
// Session -> UI
// ---------------------------------------------------------------------------

/// Everything a view needs to render one debate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub debate_id: Option<String>,
    pub prompt: Option<String>,
    pub status: DebateStatus,
    pub events: Vec<CanonicalEvent>,
    pub last_error: Option<String>,
    pub is_recovering: bool,
    pub connection: ConnectionView,
    pub vote: Option<VoteSummary>,
}

impl SessionSnapshot {
    pub fn aggregates(&self, vote_threshold: f64) -> Aggregates {
        Aggregates::compute(&self.events, self.vote.as_ref(), vote_threshold)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Full state, sent after open, load and teardown.
    Snapshot(Box<SessionSnapshot>),
    EventAppended(CanonicalEvent),
    Connection(ConnectionView),
    Status(DebateStatus),
    /// Non-fatal problem worth showing (malformed frame, failed load).
    Diagnostic(String),
}
