// Types shared between the streaming layer and its consumers: connection
// and debate status enums, the debate resource, and the connection view the
// UI renders its "live / unstable" indicator from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Timestamp;
use crate::normalize::parse_timestamp;

/// Lifecycle of the push connection for one debate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Intentionally not streaming (no url, or streaming disabled).
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Was streaming, now stopped.
    Closed,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Closed => "closed",
        }
    }
}

/// Where the debate itself is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

impl DebateStatus {
    /// Map a status string from the debate resource. Unknown values read as
    /// `Pending`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" | "scheduled" | "provisioning" => DebateStatus::Queued,
            "running" | "in_progress" | "streaming" | "active" => DebateStatus::Running,
            "completed" | "complete" | "done" | "finished" => DebateStatus::Completed,
            "failed" | "error" | "errored" | "cancelled" => DebateStatus::Failed,
            _ => DebateStatus::Pending,
        }
    }

    /// Whether live events are still expected for a debate in this state.
    pub fn should_stream(self) -> bool {
        matches!(self, DebateStatus::Queued | DebateStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DebateStatus::Completed | DebateStatus::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            DebateStatus::Pending => "pending",
            DebateStatus::Queued => "queued",
            DebateStatus::Running => "running",
            DebateStatus::Completed => "completed",
            DebateStatus::Failed => "failed",
        }
    }
}

/// External vote payload attached to a debate. When it carries an explicit
/// ranking, that ranking overrides the one derived from scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteSummary {
    #[serde(default)]
    pub ranking: Vec<String>,
}

/// The debate resource: status, prompt, timestamps and panel config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebateInfo {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "status_from_wire")]
    pub status: DebateStatus,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<Timestamp>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<Timestamp>,
    /// Panel configuration is owned by the orchestrator; kept opaque.
    #[serde(default)]
    pub panel: serde_json::Value,
    #[serde(default)]
    pub vote: Option<VoteSummary>,
}

fn status_from_wire<'de, D>(deserializer: D) -> Result<DebateStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => DebateStatus::from_wire(&s),
        _ => DebateStatus::default(),
    })
}

/// Ids arrive as strings or as integers.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Same timestamp shapes the normalizer reads; anything else is dropped.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_timestamp))
}

/// What the UI needs to render the connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionView {
    pub status: ConnectionStatus,
    pub retry_count: u32,
    /// The polling fallback is currently fetching catch-up batches.
    pub polling: bool,
    /// Persistent disconnection: shown as "unstable / polling" rather than
    /// as a hard failure.
    pub unstable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_status_aliases() {
        assert_eq!(DebateStatus::from_wire("RUNNING"), DebateStatus::Running);
        assert_eq!(DebateStatus::from_wire("in_progress"), DebateStatus::Running);
        assert_eq!(DebateStatus::from_wire("done"), DebateStatus::Completed);
        assert_eq!(DebateStatus::from_wire("errored"), DebateStatus::Failed);
        assert_eq!(DebateStatus::from_wire("mystery"), DebateStatus::Pending);
    }

    #[test]
    fn only_live_states_stream() {
        assert!(DebateStatus::Queued.should_stream());
        assert!(DebateStatus::Running.should_stream());
        assert!(!DebateStatus::Pending.should_stream());
        assert!(!DebateStatus::Completed.should_stream());
        assert!(!DebateStatus::Failed.should_stream());
    }

    #[test]
    fn debate_info_tolerates_sparse_resource() {
        let info: DebateInfo = serde_json::from_str(
            r#"{"status":"streaming","prompt":"Is P=NP?","vote":{"ranking":["B","A"]}}"#,
        )
        .unwrap();
        assert_eq!(info.status, DebateStatus::Running);
        assert_eq!(info.vote.unwrap().ranking, vec!["B", "A"]);

        let empty: DebateInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.status, DebateStatus::Pending);
        assert!(empty.panel.is_null());

        let numeric: DebateInfo = serde_json::from_str(r#"{"id":42,"status":"running"}"#).unwrap();
        assert_eq!(numeric.id.as_deref(), Some("42"));
        assert_eq!(numeric.status, DebateStatus::Running);

        let naive: DebateInfo = serde_json::from_str(
            r#"{"status":"running","created_at":"2025-03-01T12:00:00.123456","updated_at":"soon"}"#,
        )
        .unwrap();
        assert_eq!(naive.status, DebateStatus::Running);
        assert_eq!(
            naive.created_at.map(|t| t.timestamp_millis()),
            Some(1_740_830_400_123)
        );
        assert_eq!(naive.updated_at, None);

        let odd: DebateInfo = serde_json::from_str(r#"{"id":null,"status":3}"#).unwrap();
        assert_eq!(odd.id, None);
        assert_eq!(odd.status, DebateStatus::Pending);
    }
}
