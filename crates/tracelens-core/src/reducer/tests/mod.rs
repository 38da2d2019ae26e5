use crate::state::SessionId;
pub(super) use serde_json::Value;

pub(super) use super::dispatch;
pub(super) use super::DispatchOutcome;
pub(super) use crate::config::ReducerConfig;
pub(super) use crate::message::FlowTag;
pub(super) use crate::message::Message;
pub(super) use crate::message::MessageLog;
pub(super) use crate::message::MessageRole;
pub(super) use crate::message::SessionEffect;
pub(super) use crate::state::AnswerStatus;
pub(super) use crate::state::FlowStatus;
pub(super) use crate::state::InterventionAction;
pub(super) use crate::state::InterventionResolution;
pub(super) use crate::state::InterventionType;
pub(super) use crate::state::SessionLifecycle;
pub(super) use crate::state::SessionState;
pub(super) use serde_json::json;

mod error_summary;

fn state() -> SessionState {
    SessionState::with_session_id(
        SessionId::from_string("sess0001-test"),
        ReducerConfig::default(),
    )
}

/// A session plus the collaborator that applies its effects.
struct Session {
    state: SessionState,
    log: MessageLog,
    clock_ms: i64,
}

impl Session {
    fn new() -> Self {
        Self {
            state: state(),
            log: MessageLog::new(),
            clock_ms: 0,
        }
    }

    /// Dispatches one second after the previous event.
    fn send(&mut self, event_type: &str, payload: Value) -> DispatchOutcome {
        self.clock_ms += 1_000;
        self.send_at(event_type, payload, self.clock_ms)
    }

    fn send_at(&mut self, event_type: &str, payload: Value, now_ms: i64) -> DispatchOutcome {
        self.clock_ms = now_ms;
        let outcome = dispatch(&mut self.state, event_type, &payload, now_ms);
        self.log.apply_all(outcome.effects.clone());
        outcome
    }

    fn tagged(&self, tag: FlowTag) -> Vec<&Message> {
        self.log.with_tag(tag).collect()
    }

    fn single(&self, tag: FlowTag) -> &Message {
        let found = self.tagged(tag);
        assert_eq!(found.len(), 1, "expected exactly one {} message", tag.label());
        found[0]
    }

    fn transcript(&self) -> Vec<String> {
        self.state.flow.conversation_lines.to_vec()
    }
}

fn step(ordinal: u64, text: &str) -> Value {
    json!({
        "id": format!("evt-{ordinal}"),
        "data": {
            "ordinal": ordinal,
            "phase": "progress",
            "role": "agent",
            "content": { "text": text },
        },
    })
}

fn token(text: &str) -> Value {
    json!({ "data": { "token": text } })
}

/// Ordinals of transcript lines rendered as `#n [...] text`.
fn ordinals(lines: &[String]) -> Vec<u64> {
    lines
        .iter()
        .filter_map(|line| {
            line.split_whitespace()
                .next()
                .and_then(|head| head.trim_start_matches('#').parse().ok())
        })
        .collect()
}
