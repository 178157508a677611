// Canned debate for `--demo`: a short history, a live connection that drops
// mid-debate, and a second connection that redelivers one event before
// finishing. Runs entirely in memory.

use std::sync::Arc;
use std::time::Duration;

use colloquy_core::protocol::{DebateInfo, DebateStatus};
use colloquy_stream::memory::{ScriptedConnection, ScriptedTransport, StaticSource};
use serde_json::{json, Value};

pub const DEBATE_ID: &str = "demo";

const PACE: Duration = Duration::from_millis(700);

pub fn fixtures() -> (Arc<ScriptedTransport>, Arc<StaticSource>) {
    let debate = DebateInfo {
        id: Some(DEBATE_ID.to_string()),
        status: DebateStatus::Running,
        prompt: Some("Should cities ban cars from their centres?".to_string()),
        ..DebateInfo::default()
    };
    let source = StaticSource::new(debate, history());

    let transport = ScriptedTransport::new([
        ScriptedConnection::dropped(frames(&first_connection())).paced(PACE),
        ScriptedConnection::live(frames(&second_connection())).paced(PACE),
    ]);

    (Arc::new(transport), Arc::new(source))
}

fn frames(items: &[Value]) -> Vec<String> {
    items.iter().map(Value::to_string).collect()
}

fn history() -> Vec<Value> {
    vec![
        json!({ "type": "round_started", "id": "r1", "round": 1, "message": "Round 1: opening arguments" }),
        json!({
            "type": "seat_message", "id": "m1", "round": 1,
            "seat_name": "Urbanist", "content": "Car-free centres cut emissions and give streets back to people."
        }),
    ]
}

fn first_connection() -> Vec<Value> {
    vec![
        json!({
            "type": "seat_message", "id": "m2", "round": 1,
            "seat_name": "Economist", "content": "Retail footfall drops when access gets harder."
        }),
        json!({ "type": "round_started", "id": "r2", "round": 2, "message": "Round 2: revisions" }),
    ]
}

fn second_connection() -> Vec<Value> {
    vec![
        // Redelivered after the reconnect; shown once.
        json!({ "type": "round_started", "id": "r2", "round": 2, "message": "Round 2: revisions" }),
        json!({
            "type": "message", "id": "rev", "round": 2,
            "revised": [
                { "persona": "Urbanist", "text": "Phase it in, with delivery windows." },
                { "persona": "Economist", "text": "Pair the ban with transit investment." }
            ]
        }),
        json!({
            "type": "score", "id": "sc",
            "judges": [
                { "judge": "Judge A", "persona": "Urbanist", "score": 8.5, "rationale": "concrete plan" },
                { "judge": "Judge A", "persona": "Economist", "score": 6.5 },
                { "judge": "Judge B", "persona": "Urbanist", "score": 7.5 },
                { "judge": "Judge B", "persona": "Economist", "score": 7 }
            ]
        }),
        json!({ "type": "final", "id": "fin", "content": "Phased pedestrianisation backed by transit funding." }),
    ]
}
