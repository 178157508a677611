// Canonical event model: the single representation of a debate happening
// that the timeline and the UI layer ever see, independent of wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point in time an event happened (or was received, for legacy payloads
/// that carry no timestamp of their own).
pub type Timestamp = DateTime<Utc>;

/// Every event kind the timeline can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    Message(MessageEvent),
    Score(ScoreEvent),
    Pairwise(PairwiseEvent),
    Final(FinalEvent),
    Notice(NoticeEvent),
    Error(NoticeEvent),
    RoundStarted(RoundStartedEvent),
}

/// A seat's turn: an argument, critique, revision or candidate answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    pub at: Timestamp,
    #[serde(default)]
    pub round: Option<u32>,
    pub actor: String,
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub seat_id: Option<String>,
}

/// One judge's numeric score for one persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEvent {
    pub id: String,
    pub at: Timestamp,
    pub persona: String,
    pub judge: String,
    pub score: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Outcome of a head-to-head comparison between two personas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseEvent {
    pub id: String,
    pub at: Timestamp,
    pub winner: String,
    pub loser: String,
    #[serde(default)]
    pub judge: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// The synthesizer's final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalEvent {
    pub id: String,
    pub at: Timestamp,
    pub actor: String,
    pub text: String,
}

/// Free-form status line. Shared by the `notice` and `error` kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub id: String,
    pub at: Timestamp,
    pub text: String,
    /// Set when the notice reports a failure the debate cannot recover from.
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStartedEvent {
    pub id: String,
    pub at: Timestamp,
    #[serde(default)]
    pub round: Option<u32>,
    pub text: String,
}

/// Discriminant of a [`CanonicalEvent`], for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Score,
    Pairwise,
    Final,
    Notice,
    Error,
    RoundStarted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Score => "score",
            EventKind::Pairwise => "pairwise",
            EventKind::Final => "final",
            EventKind::Notice => "notice",
            EventKind::Error => "error",
            EventKind::RoundStarted => "round_started",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CanonicalEvent {
    pub fn id(&self) -> &str {
        match self {
            CanonicalEvent::Message(e) => &e.id,
            CanonicalEvent::Score(e) => &e.id,
            CanonicalEvent::Pairwise(e) => &e.id,
            CanonicalEvent::Final(e) => &e.id,
            CanonicalEvent::Notice(e) | CanonicalEvent::Error(e) => &e.id,
            CanonicalEvent::RoundStarted(e) => &e.id,
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            CanonicalEvent::Message(e) => e.at,
            CanonicalEvent::Score(e) => e.at,
            CanonicalEvent::Pairwise(e) => e.at,
            CanonicalEvent::Final(e) => e.at,
            CanonicalEvent::Notice(e) | CanonicalEvent::Error(e) => e.at,
            CanonicalEvent::RoundStarted(e) => e.at,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            CanonicalEvent::Message(_) => EventKind::Message,
            CanonicalEvent::Score(_) => EventKind::Score,
            CanonicalEvent::Pairwise(_) => EventKind::Pairwise,
            CanonicalEvent::Final(_) => EventKind::Final,
            CanonicalEvent::Notice(_) => EventKind::Notice,
            CanonicalEvent::Error(_) => EventKind::Error,
            CanonicalEvent::RoundStarted(_) => EventKind::RoundStarted,
        }
    }

    /// Whether appending this event ends the debate in failure.
    pub fn is_failure(&self) -> bool {
        match self {
            CanonicalEvent::Error(_) => true,
            CanonicalEvent::Notice(n) => n.terminal,
            _ => false,
        }
    }

    /// One-line human-readable summary, used by log output and plain-text
    /// consumers.
    pub fn summary(&self) -> String {
        match self {
            CanonicalEvent::Message(m) => match m.round {
                Some(round) => format!("[r{round}] {} ({}): {}", m.actor, m.role, m.text),
                None => format!("{} ({}): {}", m.actor, m.role, m.text),
            },
            CanonicalEvent::Score(s) => format!("{} scored {} {:.2}", s.judge, s.persona, s.score),
            CanonicalEvent::Pairwise(p) => match &p.judge {
                Some(judge) => format!("{judge}: {} beat {}", p.winner, p.loser),
                None => format!("{} beat {}", p.winner, p.loser),
            },
            CanonicalEvent::Final(f) => format!("FINAL {}: {}", f.actor, f.text),
            CanonicalEvent::Notice(n) => n.text.clone(),
            CanonicalEvent::Error(n) => format!("ERROR: {}", n.text),
            CanonicalEvent::RoundStarted(r) => r.text.clone(),
        }
    }
}
