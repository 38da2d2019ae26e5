use serde_json::Value;
use tracing::debug;
use tracing::warn;

use super::event::EventKind;
use super::event::StreamEvent;
use super::message::SessionEffect;
use super::state::SessionState;

mod answer;
mod artifacts;
mod conversation;
mod errors;
mod flow;
mod intervention;
mod lifecycle;

#[cfg(test)]
mod tests;

pub use conversation::FlushMode;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub is_terminal: bool,
    pub stop_loading: bool,
    pub effects: Vec<SessionEffect>,
}

impl DispatchOutcome {
    fn with_effects(effects: Vec<SessionEffect>) -> Self {
        Self {
            effects,
            ..Self::default()
        }
    }

    fn terminal(effects: Vec<SessionEffect>) -> Self {
        Self {
            is_terminal: true,
            stop_loading: true,
            effects,
        }
    }

    fn stop_loading(effects: Vec<SessionEffect>) -> Self {
        Self {
            is_terminal: false,
            stop_loading: true,
            effects,
        }
    }
}

pub fn dispatch_event(state: &mut SessionState, event: &StreamEvent) -> DispatchOutcome {
    dispatch(state, &event.event_type, &event.payload, event.received_at_ms)
}

pub fn dispatch(
    state: &mut SessionState,
    event_type: &str,
    payload: &Value,
    now_ms: i64,
) -> DispatchOutcome {
    let Some(kind) = EventKind::parse(event_type) else {
        warn!(event_type, "unknown event type ignored");
        return DispatchOutcome::default();
    };

    if state.lifecycle.is_closed() && !accepted_after_close(kind) {
        debug!(
            event = kind.label(),
            session_id = %state.session_id,
            "event after session close ignored"
        );
        return match kind {
            kind if kind.is_terminal() => DispatchOutcome::terminal(Vec::new()),
            EventKind::End => DispatchOutcome::stop_loading(Vec::new()),
            _ => DispatchOutcome::default(),
        };
    }

    let mut effects = Vec::new();
    match kind {
        EventKind::Progress => flow::handle_progress(state, payload, now_ms, &mut effects),
        EventKind::Thought => flow::handle_thought(state, payload, now_ms, &mut effects),
        EventKind::ToolCall => flow::handle_tool_call(state, payload, now_ms, &mut effects),
        EventKind::AgentOutput => flow::handle_agent_output(state, payload, now_ms, &mut effects),
        EventKind::ConversationStep => {
            conversation::handle_conversation_step(state, payload, now_ms, &mut effects)
        }
        EventKind::AnswerToken => answer::handle_answer_token(state, payload, now_ms, &mut effects),
        EventKind::SqlExecuted => {
            artifacts::handle_sql_executed(state, payload, now_ms, &mut effects)
        }
        EventKind::SkillSection => {
            artifacts::handle_skill_section(state, payload, now_ms, &mut effects)
        }
        EventKind::SkillDiagnostics => {
            artifacts::handle_skill_diagnostics(state, payload, now_ms, &mut effects)
        }
        EventKind::SkillLayeredResult => {
            artifacts::handle_skill_layered_result(state, payload, now_ms, &mut effects)
        }
        EventKind::Data => artifacts::handle_data(state, payload, now_ms, &mut effects),
        EventKind::InterventionRequired => {
            intervention::handle_required(state, payload, now_ms, &mut effects)
        }
        EventKind::InterventionResolved => {
            intervention::handle_resolved(state, payload, now_ms, &mut effects)
        }
        EventKind::InterventionTimeout => {
            intervention::handle_timeout(state, payload, now_ms, &mut effects)
        }
        EventKind::SkillError => errors::handle_skill_error(state, payload, now_ms),
        EventKind::AnalysisCompleted => {
            lifecycle::handle_analysis_completed(state, payload, now_ms, &mut effects);
            return DispatchOutcome::terminal(effects);
        }
        EventKind::Error => {
            lifecycle::handle_error(state, payload, now_ms, &mut effects);
            return DispatchOutcome::terminal(effects);
        }
        EventKind::End => {
            lifecycle::handle_end(state, now_ms, &mut effects);
            return DispatchOutcome::stop_loading(effects);
        }
    }

    if kind != EventKind::ConversationStep {
        conversation::tick(state, now_ms, &mut effects);
    }
    DispatchOutcome::with_effects(effects)
}

/// Artifacts keep rendering after the session closes; the streaming records
/// are frozen.
fn accepted_after_close(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::SqlExecuted
            | EventKind::SkillSection
            | EventKind::SkillDiagnostics
            | EventKind::SkillLayeredResult
            | EventKind::Data
    )
}
