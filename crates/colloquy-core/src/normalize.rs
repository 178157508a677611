// Payload normalization: maps every raw push/poll payload shape (current and
// legacy) onto zero or more canonical events.
//
// `normalize` is total. Anything it cannot make sense of yields an empty
// vector; the only fallible step is `decode_frame`, which turns a text frame
// into JSON before normalization.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use crate::event::{
    CanonicalEvent, EventKind, FinalEvent, MessageEvent, NoticeEvent, PairwiseEvent,
    RoundStartedEvent, ScoreEvent, Timestamp,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Keys that may carry the payload type, in lookup order.
const TYPE_KEYS: &[&str] = &["type", "kind", "event"];

/// Keys that may carry a producer-assigned event id.
const ID_KEYS: &[&str] = &["id", "event_id", "uuid"];

/// Keys that may carry the producer's timestamp.
const TIMESTAMP_KEYS: &[&str] = &["at", "ts", "timestamp", "created_at"];

/// Keys under which legacy envelopes nest the actual payload.
const BODY_KEYS: &[&str] = &["payload", "data"];

/// Judge label used when a score carries no judge of its own.
pub const PANEL_JUDGE: &str = "Panel";

const UNKNOWN_ACTOR: &str = "Unknown";
const SEAT_ACTOR: &str = "Seat";
const SYNTHESIZER_ACTOR: &str = "Synthesizer";

/// Epoch values at or above this are read as milliseconds, below as seconds.
const EPOCH_MILLIS_CUTOFF: f64 = 1e12;

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object (got {0})")]
    Shape(&'static str),
}

/// Decode one text frame from the push connection.
///
/// Blank frames are keep-alives and decode to `Null`. Any other JSON that
/// is not an object is a `Shape` error. When the decoded
/// object carries no type of its own and the transport labelled the frame
/// with a named event (SSE `event:` field other than the default
/// `message`), that name is used as the type.
pub fn decode_frame(event_name: Option<&str>, data: &str) -> Result<Value, DecodeError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let mut value: Value = serde_json::from_str(trimmed)?;
    let shape = match &value {
        Value::Object(_) | Value::Null => None,
        Value::Array(_) => Some("array"),
        Value::String(_) => Some("string"),
        Value::Number(_) => Some("number"),
        Value::Bool(_) => Some("bool"),
    };
    if let Some(shape) = shape {
        return Err(DecodeError::Shape(shape));
    }
    if let (Some(name), Value::Object(map)) = (event_name, &mut value) {
        let name = name.trim();
        let has_type = TYPE_KEYS.iter().any(|key| map.get(*key).is_some_and(Value::is_string));
        if !has_type && !name.is_empty() && name != "message" {
            map.insert("type".to_string(), Value::String(name.to_string()));
        }
    }
    Ok(value)
}

/// Decode and normalize one text frame.
pub fn normalize_frame(
    event_name: Option<&str>,
    data: &str,
    received_at: Timestamp,
) -> Result<Vec<CanonicalEvent>, DecodeError> {
    let value = decode_frame(event_name, data)?;
    Ok(normalize(&value, received_at))
}

// ---------------------------------------------------------------------------
// Normalization entry points
// ---------------------------------------------------------------------------

/// Map one raw payload to canonical events.
///
/// Dispatches on the payload type; the first matching rule wins and unknown
/// types produce nothing so that server additions are ignored rather than
/// rejected.
pub fn normalize(raw: &Value, received_at: Timestamp) -> Vec<CanonicalEvent> {
    let Some(envelope) = raw.as_object() else {
        return Vec::new();
    };
    let payload = Payload::from_envelope(envelope);
    let Some(kind) = payload.kind() else {
        return Vec::new();
    };

    let stamped = payload.timestamp();
    let ctx = Ctx {
        at: stamped.unwrap_or(received_at),
        stamped,
        id: payload.first_text(ID_KEYS),
        payload,
    };

    match kind.as_str() {
        "seat_message" => seat_message(&ctx),
        "message" => message(&ctx),
        "score" => score(&ctx),
        "pairwise" => pairwise(&ctx),
        "final" => final_answer(&ctx),
        "notice" => notice_like(&ctx, EventKind::Notice),
        "error" => notice_like(&ctx, EventKind::Error),
        "round_started" => notice_like(&ctx, EventKind::RoundStarted),
        other => {
            trace!(kind = other, "ignoring payload of unknown type");
            Vec::new()
        }
    }
}

/// Normalize every item of a fetched batch, preserving batch order.
pub fn normalize_batch(items: &[Value], received_at: Timestamp) -> Vec<CanonicalEvent> {
    items
        .iter()
        .flat_map(|item| normalize(item, received_at))
        .collect()
}

// ---------------------------------------------------------------------------
// Payload view
// ---------------------------------------------------------------------------

/// Read-only view over a raw object that looks fields up in the nested body
/// first and the envelope second. Nulls count as absent.
#[derive(Clone, Copy)]
struct Payload<'a> {
    envelope: &'a Map<String, Value>,
    body: Option<&'a Map<String, Value>>,
}

impl<'a> Payload<'a> {
    fn from_envelope(envelope: &'a Map<String, Value>) -> Self {
        let body = BODY_KEYS
            .iter()
            .find_map(|key| envelope.get(*key).and_then(Value::as_object));
        Payload { envelope, body }
    }

    /// View over one entry of an array field; entries never nest a body.
    fn entry(entry: &'a Map<String, Value>) -> Self {
        Payload {
            envelope: entry,
            body: None,
        }
    }

    fn kind(&self) -> Option<String> {
        TYPE_KEYS
            .iter()
            .find_map(|key| self.envelope.get(*key).and_then(value_text))
            .or_else(|| {
                let body = self.body?;
                TYPE_KEYS
                    .iter()
                    .find_map(|key| body.get(*key).and_then(value_text))
            })
            .map(|kind| kind.trim().to_ascii_lowercase())
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.body
            .and_then(|body| present(body.get(key)))
            .or_else(|| present(self.envelope.get(key)))
    }

    fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_text)
    }

    fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// A non-empty array field. Empty arrays are treated as absent.
    fn entries(&self, key: &str) -> Option<&'a Vec<Value>> {
        self.get(key)
            .and_then(Value::as_array)
            .filter(|items| !items.is_empty())
    }

    fn round(&self) -> Option<u32> {
        match self.first(&["round", "round_number"])? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn timestamp(&self) -> Option<Timestamp> {
        TIMESTAMP_KEYS
            .iter()
            .find_map(|key| self.get(key).and_then(parse_timestamp))
    }
}

/// Shared per-payload context: resolved timestamp and producer id.
struct Ctx<'a> {
    payload: Payload<'a>,
    at: Timestamp,
    /// The producer's own timestamp. Receive time never feeds an id.
    stamped: Option<Timestamp>,
    id: Option<String>,
}

impl Ctx<'_> {
    /// Id for a payload that produces a single event.
    fn event_id(&self, kind: EventKind, actor: &str, content: &str) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.synthesized(kind, actor, content))
    }

    /// Id for the `index`th entry of a multi-event payload.
    fn entry_id(
        &self,
        entry: &Payload<'_>,
        kind: EventKind,
        actor: &str,
        content: &str,
        index: usize,
    ) -> String {
        entry
            .first_text(ID_KEYS)
            .unwrap_or_else(|| self.indexed_id(kind, actor, content, index))
    }

    fn indexed_id(&self, kind: EventKind, actor: &str, content: &str, index: usize) -> String {
        match &self.id {
            Some(base) => format!("{base}:{index}"),
            None => format!("{}:{index}", self.synthesized(kind, actor, content)),
        }
    }

    fn synthesized(&self, kind: EventKind, actor: &str, content: &str) -> String {
        synthesize_id(kind, self.stamped.as_ref(), self.payload.round(), actor, content)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn seat_message(ctx: &Ctx<'_>) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;
    // Empty seat turns are placeholders the orchestrator emits before the
    // model answers; they never reach the timeline.
    let Some(text) = p.text("content") else {
        return Vec::new();
    };
    let actor = p
        .first_text(&["seat_name", "seat_id", "actor"])
        .unwrap_or_else(|| SEAT_ACTOR.to_string());

    vec![CanonicalEvent::Message(MessageEvent {
        id: ctx.event_id(EventKind::Message, &actor, &text),
        at: ctx.at,
        round: p.round(),
        role: p.text("role").unwrap_or_else(|| "seat".to_string()),
        provider: p.text("provider"),
        model: p.text("model"),
        seat_id: p.text("seat_id"),
        actor,
        text,
    })]
}

fn message(ctx: &Ctx<'_>) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;

    let batch = p
        .entries("revised")
        .map(|items| (items, "revision"))
        .or_else(|| p.entries("candidates").map(|items| (items, "candidate")));

    if let Some((items, default_role)) = batch {
        let envelope_actor = p.text("actor");
        return items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let entry = Payload::entry(item.as_object()?);
                let text = entry.text("text")?;
                let actor = entry
                    .first_text(&["persona", "role"])
                    .or_else(|| envelope_actor.clone())
                    .unwrap_or_else(|| UNKNOWN_ACTOR.to_string());
                Some(CanonicalEvent::Message(MessageEvent {
                    id: ctx.entry_id(&entry, EventKind::Message, &actor, &text, index),
                    at: entry.timestamp().unwrap_or(ctx.at),
                    round: entry.round().or_else(|| p.round()),
                    role: entry
                        .text("role")
                        .or_else(|| p.text("role"))
                        .unwrap_or_else(|| default_role.to_string()),
                    provider: entry.text("provider").or_else(|| p.text("provider")),
                    model: entry.text("model").or_else(|| p.text("model")),
                    seat_id: entry.text("seat_id").or_else(|| p.text("seat_id")),
                    actor,
                    text,
                }))
            })
            .collect();
    }

    // Already-flattened message, as served by the catch-up endpoint.
    let Some(text) = p.first_text(&["text", "content"]) else {
        return Vec::new();
    };
    let actor = p
        .first_text(&["actor", "persona", "seat_name", "role"])
        .unwrap_or_else(|| UNKNOWN_ACTOR.to_string());

    vec![CanonicalEvent::Message(MessageEvent {
        id: ctx.event_id(EventKind::Message, &actor, &text),
        at: ctx.at,
        round: p.round(),
        role: p.text("role").unwrap_or_else(|| "agent".to_string()),
        provider: p.text("provider"),
        model: p.text("model"),
        seat_id: p.text("seat_id"),
        actor,
        text,
    })]
}

fn score(ctx: &Ctx<'_>) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;
    let envelope_persona = p.first_text(&["persona", "target"]);
    let envelope_judge = p.text("actor");

    if let Some(judges) = p.entries("judges") {
        return judges
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let entry = Payload::entry(item.as_object()?);
                let persona = entry
                    .first_text(&["persona", "target", "seat_name"])
                    .or_else(|| envelope_persona.clone())?;
                let judge = entry
                    .first_text(&["judge", "name", "actor"])
                    .or_else(|| envelope_judge.clone())
                    .unwrap_or_else(|| PANEL_JUDGE.to_string());
                score_event(ctx, &entry, persona, judge, Some(index))
            })
            .collect();
    }

    let default_judge = envelope_judge.unwrap_or_else(|| PANEL_JUDGE.to_string());

    match p.get("scores") {
        Some(Value::Array(items)) if !items.is_empty() => {
            return items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    let entry = Payload::entry(item.as_object()?);
                    let persona = entry.first_text(&["persona", "seat", "name", "target"])?;
                    let judge = entry
                        .text("judge")
                        .unwrap_or_else(|| default_judge.clone());
                    score_event(ctx, &entry, persona, judge, Some(index))
                })
                .collect();
        }
        Some(Value::Object(by_persona)) if !by_persona.is_empty() => {
            // Legacy shape: `{"scores": {"Analyst": 7, "Critic": {"score": 5}}}`.
            return by_persona
                .iter()
                .enumerate()
                .filter_map(|(index, (persona, value))| match value {
                    Value::Object(inner) => score_event(
                        ctx,
                        &Payload::entry(inner),
                        persona.clone(),
                        default_judge.clone(),
                        Some(index),
                    ),
                    other => {
                        let score = coerce_score(Some(other))?;
                        let actor = format!("{default_judge}>{persona}");
                        let content = score.to_string();
                        Some(CanonicalEvent::Score(ScoreEvent {
                            id: ctx.indexed_id(EventKind::Score, &actor, &content, index),
                            at: ctx.at,
                            persona: persona.clone(),
                            judge: default_judge.clone(),
                            score,
                            rationale: None,
                        }))
                    }
                })
                .collect();
        }
        _ => {}
    }

    // Flattened single score.
    let Some(persona) = envelope_persona else {
        return Vec::new();
    };
    let judge = p.text("judge").unwrap_or(default_judge);
    score_event(ctx, p, persona, judge, None).into_iter().collect()
}

fn score_event(
    ctx: &Ctx<'_>,
    entry: &Payload<'_>,
    persona: String,
    judge: String,
    index: Option<usize>,
) -> Option<CanonicalEvent> {
    let score = coerce_score(entry.first(&["score", "value"]))?;
    let actor = format!("{judge}>{persona}");
    let content = score.to_string();
    let id = match index {
        Some(index) => ctx.entry_id(entry, EventKind::Score, &actor, &content, index),
        None => ctx.event_id(EventKind::Score, &actor, &content),
    };
    Some(CanonicalEvent::Score(ScoreEvent {
        id,
        at: entry.timestamp().unwrap_or(ctx.at),
        rationale: entry.first_text(&["rationale", "reason", "comment"]),
        persona,
        judge,
        score,
    }))
}

fn pairwise(ctx: &Ctx<'_>) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;
    let envelope_judge = p.first_text(&["judge", "actor"]);
    let envelope_category = p.text("category");

    if let Some(results) = p.entries("results") {
        return results
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                let entry = Payload::entry(item.as_object()?);
                let winner = entry.text("winner")?;
                let loser = entry.text("loser")?;
                let actor = format!("{winner}>{loser}");
                Some(CanonicalEvent::Pairwise(PairwiseEvent {
                    id: ctx.entry_id(&entry, EventKind::Pairwise, &actor, "", index),
                    at: entry.timestamp().unwrap_or(ctx.at),
                    judge: entry.text("judge").or_else(|| envelope_judge.clone()),
                    category: entry.text("category").or_else(|| envelope_category.clone()),
                    winner,
                    loser,
                }))
            })
            .collect();
    }

    let (Some(winner), Some(loser)) = (p.text("winner"), p.text("loser")) else {
        return Vec::new();
    };
    let actor = format!("{winner}>{loser}");
    vec![CanonicalEvent::Pairwise(PairwiseEvent {
        id: ctx.event_id(EventKind::Pairwise, &actor, ""),
        at: ctx.at,
        judge: envelope_judge,
        category: envelope_category,
        winner,
        loser,
    })]
}

fn final_answer(ctx: &Ctx<'_>) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;
    let text = p
        .text("content")
        .or_else(|| {
            p.get("meta")
                .and_then(|meta| meta.get("final_content"))
                .and_then(value_text)
        })
        .or_else(|| p.text("text"))
        .unwrap_or_default();
    let actor = p
        .first_text(&["actor", "seat_name", "persona"])
        .unwrap_or_else(|| SYNTHESIZER_ACTOR.to_string());

    vec![CanonicalEvent::Final(FinalEvent {
        id: ctx.event_id(EventKind::Final, &actor, &text),
        at: ctx.at,
        actor,
        text,
    })]
}

/// `notice`, `error` and `round_started` share one text-derivation rule.
fn notice_like(ctx: &Ctx<'_>, kind: EventKind) -> Vec<CanonicalEvent> {
    let p = &ctx.payload;
    let round = p.round();

    let text = p
        .first_text(&["message", "detail", "text"])
        .or_else(|| match (kind, round) {
            (EventKind::RoundStarted, Some(n)) => Some(format!("Round {n} started")),
            _ => None,
        });
    let Some(text) = text else {
        return Vec::new();
    };

    let actor = match (kind, round) {
        (EventKind::RoundStarted, Some(n)) => format!("round-{n}"),
        _ => p.text("actor").unwrap_or_else(|| "system".to_string()),
    };
    let id = ctx.event_id(kind, &actor, &text);

    let event = match kind {
        EventKind::RoundStarted => CanonicalEvent::RoundStarted(RoundStartedEvent {
            id,
            at: ctx.at,
            round,
            text,
        }),
        EventKind::Error => CanonicalEvent::Error(NoticeEvent {
            id,
            at: ctx.at,
            text,
            terminal: true,
        }),
        _ => CanonicalEvent::Notice(NoticeEvent {
            id,
            at: ctx.at,
            text,
            terminal: is_terminal_notice(p),
        }),
    };
    vec![event]
}

fn is_terminal_notice(p: &Payload<'_>) -> bool {
    let flagged = ["terminal", "fatal"]
        .iter()
        .any(|key| p.get(key).and_then(Value::as_bool).unwrap_or(false));
    let severe = p
        .first_text(&["level", "severity"])
        .is_some_and(|level| {
            matches!(
                level.trim().to_ascii_lowercase().as_str(),
                "error" | "fatal" | "failure" | "critical"
            )
        });
    flagged || severe
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Non-blank strings as-is, numbers rendered; anything else is absent.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric coercion for scores: absent or null counts as 0, numeric strings
/// are parsed, and values that cannot become a finite number are rejected.
fn coerce_score(value: Option<&Value>) -> Option<f64> {
    let score = match value {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64()?,
        Some(Value::String(s)) if s.trim().is_empty() => 0.0,
        Some(Value::String(s)) => s.trim().parse::<f64>().ok()?,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(_) => return None,
    };
    score.is_finite().then_some(score)
}

/// Parse an RFC 3339 string, a naive ISO-8601 string (read as UTC), or an
/// epoch number in seconds or milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            s.parse::<f64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(value: f64) -> Option<Timestamp> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value >= EPOCH_MILLIS_CUTOFF {
        value
    } else {
        value * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Deterministic id for payloads that arrive without one: the same logical
/// event delivered twice (push and poll, or a replayed batch) maps to the
/// same id. Only the producer's timestamp takes part; without one the id
/// rests on kind, round, actor and content.
fn synthesize_id(
    kind: EventKind,
    stamped: Option<&Timestamp>,
    round: Option<u32>,
    actor: &str,
    content: &str,
) -> String {
    let mut hasher = DefaultHasher::new();
    round.hash(&mut hasher);
    content.hash(&mut hasher);
    let digest = hasher.finish() as u32;
    let actor: String = actor
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    match stamped {
        Some(at) => format!("{kind}:{}:{actor}:{digest:08x}", at.timestamp_millis()),
        None => format!("{kind}:{actor}:{digest:08x}"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn only(events: Vec<CanonicalEvent>) -> CanonicalEvent {
        assert_eq!(events.len(), 1, "expected exactly one event, got {events:?}");
        events.into_iter().next().unwrap()
    }

    // -- totality --

    #[test]
    fn malformed_inputs_produce_nothing() {
        let inputs = vec![
            Value::Null,
            json!(42),
            json!("seat_message"),
            json!([1, 2, 3]),
            json!({}),
            json!({ "type": 7 }),
            json!({ "type": null, "content": "hi" }),
            json!({ "type": "score", "judges": "not-an-array" }),
            json!({ "type": "pairwise", "winner": "A" }),
            json!({ "type": "message", "revised": [null, 3, { "text": "" }] }),
        ];
        for input in inputs {
            assert!(normalize(&input, t0()).is_empty(), "input {input} produced events");
        }
    }

    #[test]
    fn unknown_type_is_ignored() {
        let raw = json!({ "type": "seat_thinking", "content": "hmm" });
        assert!(normalize(&raw, t0()).is_empty());
    }

    // -- seat_message --

    #[test]
    fn empty_seat_message_is_dropped() {
        assert!(normalize(&json!({ "type": "seat_message", "content": "" }), t0()).is_empty());
        assert!(normalize(&json!({ "type": "seat_message", "content": "   " }), t0()).is_empty());
        assert!(normalize(&json!({ "type": "seat_message", "seat_name": "A" }), t0()).is_empty());
    }

    #[test]
    fn seat_message_prefers_seat_name() {
        let raw = json!({
            "type": "seat_message",
            "content": "hi",
            "seat_name": "Analyst",
            "seat_id": "seat-1",
            "round": 2,
            "provider": "openai",
            "model": "gpt-4o"
        });
        let CanonicalEvent::Message(m) = only(normalize(&raw, t0())) else {
            panic!("expected message");
        };
        assert_eq!(m.actor, "Analyst");
        assert_eq!(m.text, "hi");
        assert_eq!(m.round, Some(2));
        assert_eq!(m.seat_id.as_deref(), Some("seat-1"));
        assert_eq!(m.provider.as_deref(), Some("openai"));
        assert_eq!(m.at, t0());
    }

    #[test]
    fn seat_message_falls_back_to_seat_id_then_actor() {
        let by_id = json!({ "type": "seat_message", "content": "x", "seat_id": "seat-9", "actor": "A" });
        let CanonicalEvent::Message(m) = only(normalize(&by_id, t0())) else { panic!() };
        assert_eq!(m.actor, "seat-9");

        let by_actor = json!({ "type": "seat_message", "content": "x", "actor": "A" });
        let CanonicalEvent::Message(m) = only(normalize(&by_actor, t0())) else { panic!() };
        assert_eq!(m.actor, "A");
    }

    // -- message --

    #[test]
    fn revised_entries_become_one_message_each() {
        let raw = json!({
            "type": "message",
            "actor": "Reviser",
            "revised": [
                { "persona": "Analyst", "text": "first" },
                { "role": "critic", "text": "second" },
                { "text": "third" },
                { "persona": "Skipped", "text": "" }
            ]
        });
        let events = normalize(&raw, t0());
        let actors: Vec<_> = events
            .iter()
            .map(|e| match e {
                CanonicalEvent::Message(m) => m.actor.as_str(),
                _ => panic!("expected messages"),
            })
            .collect();
        assert_eq!(actors, vec!["Analyst", "critic", "Reviser"]);

        let ids: std::collections::HashSet<_> = events.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(ids.len(), 3, "entry ids must be distinct");
    }

    #[test]
    fn candidates_used_when_no_revised() {
        let raw = json!({
            "type": "message",
            "id": "evt-7",
            "candidates": [{ "persona": "A", "text": "one" }, { "persona": "B", "text": "two" }]
        });
        let events = normalize(&raw, t0());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id(), "evt-7:0");
        assert_eq!(events[1].id(), "evt-7:1");
        let CanonicalEvent::Message(m) = &events[0] else { panic!() };
        assert_eq!(m.role, "candidate");
    }

    #[test]
    fn flattened_message_passes_through() {
        let raw = json!({
            "type": "message",
            "id": "m-1",
            "at": "2025-03-01T12:00:05Z",
            "actor": "Critic",
            "role": "critic",
            "text": "I disagree"
        });
        let CanonicalEvent::Message(m) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(m.id, "m-1");
        assert_eq!(m.actor, "Critic");
        assert_eq!(m.at, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 5).unwrap());
    }

    // -- score --

    #[test]
    fn judges_array_yields_one_score_per_judge() {
        let raw = json!({
            "type": "score",
            "persona": "Analyst",
            "judges": [
                { "judge": "J1", "score": 8, "rationale": "sharp" },
                { "judge": "J2", "score": "6.5" },
                { "judge": "J3" }
            ]
        });
        let scores: Vec<_> = normalize(&raw, t0())
            .into_iter()
            .map(|e| match e {
                CanonicalEvent::Score(s) => (s.judge, s.persona, s.score, s.rationale),
                _ => panic!("expected scores"),
            })
            .collect();
        assert_eq!(
            scores,
            vec![
                ("J1".into(), "Analyst".into(), 8.0, Some("sharp".into())),
                ("J2".into(), "Analyst".into(), 6.5, None),
                ("J3".into(), "Analyst".into(), 0.0, None),
            ]
        );
    }

    #[test]
    fn scores_array_defaults_judge_to_actor_or_panel() {
        let with_actor = json!({
            "type": "score",
            "actor": "Head Judge",
            "scores": [{ "persona": "A", "score": 7 }, { "persona": "B", "value": 4 }]
        });
        let events = normalize(&with_actor, t0());
        assert_eq!(events.len(), 2);
        for event in &events {
            let CanonicalEvent::Score(s) = event else { panic!() };
            assert_eq!(s.judge, "Head Judge");
        }

        let without_actor = json!({ "type": "score", "scores": [{ "persona": "A", "score": 7 }] });
        let CanonicalEvent::Score(s) = only(normalize(&without_actor, t0())) else { panic!() };
        assert_eq!(s.judge, PANEL_JUDGE);
    }

    #[test]
    fn judges_take_precedence_over_scores() {
        let raw = json!({
            "type": "score",
            "persona": "A",
            "judges": [{ "judge": "J1", "score": 9 }],
            "scores": [{ "persona": "A", "score": 1 }, { "persona": "B", "score": 2 }]
        });
        let CanonicalEvent::Score(s) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(s.judge, "J1");
        assert_eq!(s.score, 9.0);
    }

    #[test]
    fn legacy_score_object_map() {
        let raw = json!({
            "type": "score",
            "scores": { "Analyst": 7, "Critic": { "score": 5, "rationale": "thin" } }
        });
        let mut events = normalize(&raw, t0());
        events.sort_by(|a, b| a.id().cmp(b.id()));
        assert_eq!(events.len(), 2);
        let personas: std::collections::HashSet<_> = events
            .iter()
            .map(|e| match e {
                CanonicalEvent::Score(s) => s.persona.clone(),
                _ => panic!(),
            })
            .collect();
        assert!(personas.contains("Analyst") && personas.contains("Critic"));
    }

    #[test]
    fn non_numeric_score_entry_is_skipped() {
        let raw = json!({
            "type": "score",
            "persona": "A",
            "judges": [{ "judge": "J1", "score": "great" }, { "judge": "J2", "score": 3 }]
        });
        let CanonicalEvent::Score(s) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(s.judge, "J2");
    }

    #[test]
    fn flattened_score_passes_through() {
        let raw = json!({ "type": "score", "id": "s-1", "persona": "A", "judge": "J1", "score": 7.25 });
        let CanonicalEvent::Score(s) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(s.id, "s-1");
        assert_eq!(s.score, 7.25);
    }

    // -- pairwise --

    #[test]
    fn pairwise_single_and_results() {
        let single = json!({ "type": "pairwise", "winner": "A", "loser": "B", "judge": "J1" });
        let CanonicalEvent::Pairwise(p) = only(normalize(&single, t0())) else { panic!() };
        assert_eq!((p.winner.as_str(), p.loser.as_str()), ("A", "B"));
        assert_eq!(p.judge.as_deref(), Some("J1"));

        let many = json!({
            "type": "pairwise",
            "category": "logic",
            "results": [
                { "winner": "A", "loser": "B", "judge": "J1" },
                { "winner": "C" },
                { "winner": "B", "loser": "C", "judge": "J2", "category": "style" }
            ]
        });
        let events = normalize(&many, t0());
        assert_eq!(events.len(), 2);
        let CanonicalEvent::Pairwise(first) = &events[0] else { panic!() };
        assert_eq!(first.category.as_deref(), Some("logic"));
        let CanonicalEvent::Pairwise(second) = &events[1] else { panic!() };
        assert_eq!(second.category.as_deref(), Some("style"));
    }

    // -- final --

    #[test]
    fn final_text_fallback_order() {
        let content = json!({ "type": "final", "content": "answer", "meta": { "final_content": "meta" } });
        let CanonicalEvent::Final(f) = only(normalize(&content, t0())) else { panic!() };
        assert_eq!(f.text, "answer");
        assert_eq!(f.actor, "Synthesizer");

        let meta = json!({ "type": "final", "meta": { "final_content": "meta" } });
        let CanonicalEvent::Final(f) = only(normalize(&meta, t0())) else { panic!() };
        assert_eq!(f.text, "meta");

        let empty = json!({ "type": "final", "actor": "Synth" });
        let CanonicalEvent::Final(f) = only(normalize(&empty, t0())) else { panic!() };
        assert_eq!(f.text, "");
        assert_eq!(f.actor, "Synth");
    }

    // -- notice / error / round_started --

    #[test]
    fn notice_text_prefers_message_then_detail() {
        let both = json!({ "type": "notice", "message": "m", "detail": "d" });
        let CanonicalEvent::Notice(n) = only(normalize(&both, t0())) else { panic!() };
        assert_eq!(n.text, "m");
        assert!(!n.terminal);

        let detail = json!({ "type": "notice", "detail": "d" });
        let CanonicalEvent::Notice(n) = only(normalize(&detail, t0())) else { panic!() };
        assert_eq!(n.text, "d");

        assert!(normalize(&json!({ "type": "notice" }), t0()).is_empty());
    }

    #[test]
    fn error_payload_becomes_error_event() {
        let raw = json!({ "type": "error", "detail": "orchestrator crashed" });
        let event = only(normalize(&raw, t0()));
        assert_eq!(event.kind(), EventKind::Error);
        assert!(event.is_failure());
    }

    #[test]
    fn severe_notice_is_terminal() {
        let raw = json!({ "type": "notice", "message": "provider quota exhausted", "level": "FATAL" });
        let CanonicalEvent::Notice(n) = only(normalize(&raw, t0())) else { panic!() };
        assert!(n.terminal);
    }

    #[test]
    fn round_started_synthesizes_text() {
        let raw = json!({ "type": "round_started", "round": 3 });
        let CanonicalEvent::RoundStarted(r) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(r.text, "Round 3 started");
        assert_eq!(r.round, Some(3));

        let with_message = json!({ "type": "round_started", "round": 3, "message": "Rebuttals" });
        let CanonicalEvent::RoundStarted(r) = only(normalize(&with_message, t0())) else { panic!() };
        assert_eq!(r.text, "Rebuttals");

        assert!(normalize(&json!({ "type": "round_started" }), t0()).is_empty());
    }

    // -- envelopes and ids --

    #[test]
    fn legacy_envelope_with_nested_payload() {
        let raw = json!({
            "kind": "seat_message",
            "ts": 1_740_830_400_000_i64,
            "payload": { "content": "nested", "seat_name": "Skeptic" }
        });
        let CanonicalEvent::Message(m) = only(normalize(&raw, t0())) else { panic!() };
        assert_eq!(m.actor, "Skeptic");
        assert_eq!(m.at.timestamp_millis(), 1_740_830_400_000);
    }

    #[test]
    fn synthesized_ids_are_stable_across_redelivery() {
        let raw = json!({
            "type": "seat_message",
            "content": "same turn",
            "seat_name": "Analyst",
            "created_at": "2025-03-01T12:00:00"
        });
        let first = normalize(&raw, t0());
        let second = normalize(&raw, t0() + chrono::Duration::seconds(30));
        assert_eq!(first[0].id(), second[0].id());
        assert!(first[0].id().starts_with("message:"));
    }

    #[test]
    fn unstamped_redelivery_keeps_its_id() {
        let batch = vec![
            json!({ "type": "seat_message", "seat_name": "Analyst", "content": "hi" }),
            json!({ "type": "message", "revised": [{ "persona": "Critic", "text": "again" }] }),
        ];
        let mut timeline = crate::timeline::Timeline::new();
        for tick in 0..3 {
            let received = t0() + chrono::Duration::seconds(3 * tick);
            for event in normalize_batch(&batch, received) {
                timeline.append(event);
            }
        }
        assert_eq!(timeline.len(), 2);
        // Receive time still becomes the event's timestamp.
        assert_eq!(timeline.events()[0].at(), t0());
    }

    #[test]
    fn unstamped_turns_in_different_rounds_stay_distinct() {
        let a = normalize(&json!({ "type": "seat_message", "seat_name": "A", "content": "agree", "round": 1 }), t0());
        let b = normalize(&json!({ "type": "seat_message", "seat_name": "A", "content": "agree", "round": 2 }), t0());
        assert_ne!(a[0].id(), b[0].id());
    }

    #[test]
    fn distinct_text_at_same_instant_gets_distinct_ids() {
        let a = normalize(&json!({ "type": "notice", "message": "one" }), t0());
        let b = normalize(&json!({ "type": "notice", "message": "two" }), t0());
        assert_ne!(a[0].id(), b[0].id());
    }

    #[test]
    fn batch_preserves_order() {
        let items = vec![
            json!({ "type": "round_started", "round": 1 }),
            json!({ "type": "bogus" }),
            json!({ "type": "seat_message", "content": "hi", "seat_name": "A" }),
        ];
        let events = normalize_batch(&items, t0());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), EventKind::RoundStarted);
        assert_eq!(events[1].kind(), EventKind::Message);
    }

    // -- decoding --

    #[test]
    fn decode_blank_frame_is_keepalive() {
        assert_eq!(decode_frame(None, "  \n").unwrap(), Value::Null);
    }

    #[test]
    fn decode_invalid_json_is_error() {
        assert!(decode_frame(None, "{not json").is_err());
    }

    #[test]
    fn decode_non_object_is_shape_error() {
        for (data, shape) in [("42", "number"), ("[1,2]", "array"), (r#""oops""#, "string"), ("true", "bool")] {
            match normalize_frame(None, data, t0()) {
                Err(DecodeError::Shape(got)) => assert_eq!(got, shape, "frame {data}"),
                other => panic!("frame {data}: expected shape error, got {other:?}"),
            }
        }
        // Unknown types stay silent.
        assert!(normalize_frame(None, r#"{"type":"mystery"}"#, t0()).unwrap().is_empty());
        assert!(normalize_frame(None, "null", t0()).unwrap().is_empty());
    }

    #[test]
    fn decode_uses_sse_event_name_as_type() {
        let value = decode_frame(Some("final"), r#"{"content":"done"}"#).unwrap();
        assert_eq!(value["type"], "final");

        let untouched = decode_frame(Some("message"), r#"{"content":"x"}"#).unwrap();
        assert!(untouched.get("type").is_none());

        let explicit = decode_frame(Some("final"), r#"{"type":"notice","message":"x"}"#).unwrap();
        assert_eq!(explicit["type"], "notice");
    }

    #[test]
    fn normalize_frame_end_to_end() {
        let events = normalize_frame(
            None,
            r#"{"type":"seat_message","content":"hi","seat_name":"Analyst"}"#,
            t0(),
        )
        .unwrap();
        assert_eq!(events.len(), 1);
    }

    // -- timestamps --

    #[test]
    fn timestamp_formats() {
        let rfc = parse_timestamp(&json!("2025-03-01T12:00:00+01:00")).unwrap();
        assert_eq!(rfc, Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap());

        let naive = parse_timestamp(&json!("2025-03-01 12:00:00.250")).unwrap();
        assert_eq!(naive.timestamp_millis(), t0().timestamp_millis() + 250);

        let seconds = parse_timestamp(&json!(1_740_830_400)).unwrap();
        let millis = parse_timestamp(&json!(1_740_830_400_000_i64)).unwrap();
        assert_eq!(seconds, millis);

        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(-5)).is_none());
    }
}
