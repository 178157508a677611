// Timeline store: the ordered, deduplicated event list for one debate view,
// plus the debate status it drives.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::event::CanonicalEvent;
use crate::protocol::DebateStatus;

/// Ordered, id-deduplicated events for a single debate.
///
/// Mutated only through [`Timeline::initialize`] (dedup + sort) and
/// [`Timeline::append`] (no-op on a known id). Push and poll deliveries both
/// go through `append`, so re-delivery is always safe.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<CanonicalEvent>,
    ids: HashSet<String>,
    status: DebateStatus,
    last_error: Option<String>,
    is_recovering: bool,
}

/// Read-only copy of a timeline handed to the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineSnapshot {
    pub events: Vec<CanonicalEvent>,
    pub status: DebateStatus,
    pub last_error: Option<String>,
    pub is_recovering: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content with `events`, keeping the last record per id and
    /// sorting ascending by timestamp. Ties are ordered by id so that every
    /// permutation of the same input yields the same sequence.
    pub fn initialize<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = CanonicalEvent>,
    {
        let mut by_id: HashMap<String, CanonicalEvent> = HashMap::new();
        for event in events {
            by_id.insert(event.id().to_string(), event);
        }

        let mut events: Vec<CanonicalEvent> = by_id.into_values().collect();
        events.sort_by(|a, b| a.at().cmp(&b.at()).then_with(|| a.id().cmp(b.id())));

        self.ids = events.iter().map(|e| e.id().to_string()).collect();
        self.events = events;
        self.is_recovering = false;
        debug!(count = self.events.len(), "timeline initialized");
    }

    /// Append `event` unless its id is already present. Returns whether the
    /// timeline changed.
    ///
    /// A `final` event completes the debate; an `error` event or a terminal
    /// notice fails it. No other content changes the status.
    pub fn append(&mut self, event: CanonicalEvent) -> bool {
        if self.ids.contains(event.id()) {
            return false;
        }

        let transition = match &event {
            CanonicalEvent::Final(_) => Some(DebateStatus::Completed),
            e if e.is_failure() => Some(DebateStatus::Failed),
            _ => None,
        };
        if let Some(status) = transition {
            if self.status != status {
                info!(
                    from = self.status.label(),
                    to = status.label(),
                    event = event.id(),
                    "debate status changed by timeline event"
                );
            }
            self.status = status;
        }

        self.ids.insert(event.id().to_string());
        self.events.push(event);
        true
    }

    /// Clear everything back to the initial state. Used when the view goes
    /// away or switches to a different debate.
    pub fn reset(&mut self) {
        *self = Timeline::default();
    }

    pub fn events(&self) -> &[CanonicalEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn status(&self) -> DebateStatus {
        self.status
    }

    /// Explicit status from connection or provisioning state.
    pub fn set_status(&mut self, status: DebateStatus) {
        self.status = status;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a non-fatal diagnostic (e.g. a malformed payload). Does not
    /// change the debate status.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn is_recovering(&self) -> bool {
        self.is_recovering
    }

    pub fn set_recovering(&mut self, recovering: bool) {
        self.is_recovering = recovering;
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            events: self.events.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            is_recovering: self.is_recovering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{FinalEvent, MessageEvent, NoticeEvent, ScoreEvent, Timestamp};
    use chrono::{Duration, TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(id: &str, secs: i64, text: &str) -> CanonicalEvent {
        CanonicalEvent::Message(MessageEvent {
            id: id.into(),
            at: at(secs),
            round: None,
            actor: "A".into(),
            role: "debater".into(),
            text: text.into(),
            provider: None,
            model: None,
            seat_id: None,
        })
    }

    fn notice(id: &str, terminal: bool) -> NoticeEvent {
        NoticeEvent {
            id: id.into(),
            at: at(0),
            text: "n".into(),
            terminal,
        }
    }

    #[test]
    fn append_twice_is_idempotent() {
        let mut timeline = Timeline::new();
        assert!(timeline.append(msg("m1", 0, "hi")));
        let once = timeline.snapshot();

        assert!(!timeline.append(msg("m1", 0, "hi")));
        assert_eq!(timeline.snapshot(), once);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn append_keeps_first_record_for_known_id() {
        let mut timeline = Timeline::new();
        timeline.append(msg("m1", 0, "original"));
        timeline.append(msg("m1", 5, "replayed with different text"));
        let CanonicalEvent::Message(m) = &timeline.events()[0] else { panic!() };
        assert_eq!(m.text, "original");
    }

    #[test]
    fn append_does_not_resort() {
        let mut timeline = Timeline::new();
        timeline.append(msg("late", 10, "x"));
        timeline.append(msg("early", 1, "y"));
        let ids: Vec<_> = timeline.events().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["late", "early"]);
    }

    #[test]
    fn initialize_is_permutation_independent() {
        let events = vec![
            msg("c", 3, "c"),
            msg("a", 1, "a"),
            msg("b2", 2, "b2"),
            msg("b1", 2, "b1"),
            msg("d", 4, "d"),
        ];

        let mut expected: Option<Vec<CanonicalEvent>> = None;
        // Rotations and reversal cover enough orderings to catch any
        // dependency on input order.
        for shift in 0..events.len() {
            for reversed in [false, true] {
                let mut input = events.clone();
                input.rotate_left(shift);
                if reversed {
                    input.reverse();
                }
                let mut timeline = Timeline::new();
                timeline.initialize(input);
                let got = timeline.events().to_vec();
                match &expected {
                    None => expected = Some(got),
                    Some(e) => assert_eq!(&got, e),
                }
            }
        }

        let ids: Vec<_> = expected.unwrap().iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c", "d"]);
    }

    #[test]
    fn initialize_dedups_last_write_wins() {
        let mut timeline = Timeline::new();
        timeline.initialize(vec![msg("m1", 0, "first"), msg("m2", 1, "x"), msg("m1", 0, "second")]);
        assert_eq!(timeline.len(), 2);
        let CanonicalEvent::Message(m) = &timeline.events()[0] else { panic!() };
        assert_eq!(m.text, "second");
        assert!(timeline.contains("m2"));
    }

    #[test]
    fn initialize_replaces_content_and_clears_recovering() {
        let mut timeline = Timeline::new();
        timeline.append(msg("old", 0, "x"));
        timeline.set_recovering(true);
        timeline.initialize(vec![msg("new", 1, "y")]);
        assert!(!timeline.contains("old"));
        assert!(!timeline.is_recovering());
        // Appending the replaced id is accepted again.
        assert!(timeline.append(msg("old", 0, "x")));
    }

    #[test]
    fn final_event_completes_running_debate() {
        let mut timeline = Timeline::new();
        timeline.set_status(DebateStatus::Running);
        timeline.append(CanonicalEvent::Final(FinalEvent {
            id: "f".into(),
            at: at(9),
            actor: "Synthesizer".into(),
            text: "answer".into(),
        }));
        assert_eq!(timeline.status(), DebateStatus::Completed);
    }

    #[test]
    fn error_event_fails_debate() {
        let mut timeline = Timeline::new();
        timeline.set_status(DebateStatus::Running);
        timeline.append(CanonicalEvent::Error(notice("e", true)));
        assert_eq!(timeline.status(), DebateStatus::Failed);
    }

    #[test]
    fn only_terminal_notices_fail_debate() {
        let mut timeline = Timeline::new();
        timeline.set_status(DebateStatus::Running);
        timeline.append(CanonicalEvent::Notice(notice("n1", false)));
        assert_eq!(timeline.status(), DebateStatus::Running);
        timeline.append(CanonicalEvent::Notice(notice("n2", true)));
        assert_eq!(timeline.status(), DebateStatus::Failed);
    }

    #[test]
    fn other_events_leave_status_alone() {
        let mut timeline = Timeline::new();
        timeline.set_status(DebateStatus::Running);
        timeline.append(CanonicalEvent::Score(ScoreEvent {
            id: "s".into(),
            at: at(1),
            persona: "A".into(),
            judge: "J".into(),
            score: 5.0,
            rationale: None,
        }));
        assert_eq!(timeline.status(), DebateStatus::Running);
    }

    #[test]
    fn duplicate_final_does_not_retrigger() {
        let mut timeline = Timeline::new();
        let final_event = CanonicalEvent::Final(FinalEvent {
            id: "f".into(),
            at: at(9),
            actor: "S".into(),
            text: "t".into(),
        });
        timeline.append(final_event.clone());
        timeline.set_status(DebateStatus::Running);
        assert!(!timeline.append(final_event));
        assert_eq!(timeline.status(), DebateStatus::Running);
    }

    #[test]
    fn record_error_is_non_fatal() {
        let mut timeline = Timeline::new();
        timeline.set_status(DebateStatus::Running);
        timeline.record_error("bad frame");
        assert_eq!(timeline.last_error(), Some("bad frame"));
        assert_eq!(timeline.status(), DebateStatus::Running);
    }

    #[test]
    fn reset_clears_everything() {
        let mut timeline = Timeline::new();
        timeline.append(msg("m", 0, "x"));
        timeline.set_status(DebateStatus::Running);
        timeline.record_error("oops");
        timeline.set_recovering(true);

        timeline.reset();

        assert!(timeline.is_empty());
        assert!(!timeline.contains("m"));
        assert_eq!(timeline.status(), DebateStatus::Pending);
        assert!(timeline.last_error().is_none());
        assert!(!timeline.is_recovering());
    }
}
