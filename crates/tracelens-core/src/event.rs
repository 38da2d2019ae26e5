use serde_json::Value;

use crate::fields;

/// Named events pushed by the analysis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Thought,
    ToolCall,
    AgentOutput,
    ConversationStep,
    AnswerToken,
    SqlExecuted,
    SkillSection,
    SkillDiagnostics,
    SkillLayeredResult,
    Data,
    InterventionRequired,
    InterventionResolved,
    InterventionTimeout,
    AnalysisCompleted,
    Error,
    SkillError,
    End,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        let kind = match event_type.trim() {
            "progress" => Self::Progress,
            "thought" | "worker_thought" => Self::Thought,
            "tool_call" | "agent_task_dispatched" => Self::ToolCall,
            "agent_response" | "finding" => Self::AgentOutput,
            "conversation_step" => Self::ConversationStep,
            "answer_token" => Self::AnswerToken,
            "sql_executed" => Self::SqlExecuted,
            "skill_section" => Self::SkillSection,
            "skill_diagnostics" => Self::SkillDiagnostics,
            "skill_layered_result" => Self::SkillLayeredResult,
            "data" => Self::Data,
            "intervention_required" => Self::InterventionRequired,
            "intervention_resolved" => Self::InterventionResolved,
            "intervention_timeout" => Self::InterventionTimeout,
            "analysis_completed" => Self::AnalysisCompleted,
            "error" => Self::Error,
            "skill_error" => Self::SkillError,
            "end" => Self::End,
            _ => return None,
        };
        Some(kind)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Thought => "thought",
            Self::ToolCall => "tool_call",
            Self::AgentOutput => "agent_response",
            Self::ConversationStep => "conversation_step",
            Self::AnswerToken => "answer_token",
            Self::SqlExecuted => "sql_executed",
            Self::SkillSection => "skill_section",
            Self::SkillDiagnostics => "skill_diagnostics",
            Self::SkillLayeredResult => "skill_layered_result",
            Self::Data => "data",
            Self::InterventionRequired => "intervention_required",
            Self::InterventionResolved => "intervention_resolved",
            Self::InterventionTimeout => "intervention_timeout",
            Self::AnalysisCompleted => "analysis_completed",
            Self::Error => "error",
            Self::SkillError => "skill_error",
            Self::End => "end",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AnalysisCompleted | Self::Error)
    }
}

/// One inbound record as delivered by the transport. The whole record is the
/// payload handed to the reducer; `event_type` is lifted out for routing.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event_type: String,
    pub received_at_ms: i64,
    pub payload: Value,
}

impl StreamEvent {
    pub fn new(event_type: impl Into<String>, payload: Value, received_at_ms: i64) -> Self {
        Self {
            event_type: event_type.into(),
            received_at_ms,
            payload,
        }
    }

    /// The record-level id, used as the envelope id for `data` events.
    pub fn id(&self) -> Option<String> {
        fields::read_opt_string(&self.payload, "id")
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }
}

static NULL: Value = Value::Null;

/// The nested `data` object, or `null` when absent or malformed.
pub fn event_data(payload: &Value) -> &Value {
    fields::field(payload, "data")
        .filter(|v| v.is_object())
        .unwrap_or(&NULL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_label() {
        let kinds = [
            EventKind::Progress,
            EventKind::Thought,
            EventKind::ToolCall,
            EventKind::AgentOutput,
            EventKind::ConversationStep,
            EventKind::AnswerToken,
            EventKind::SqlExecuted,
            EventKind::SkillSection,
            EventKind::SkillDiagnostics,
            EventKind::SkillLayeredResult,
            EventKind::Data,
            EventKind::InterventionRequired,
            EventKind::InterventionResolved,
            EventKind::InterventionTimeout,
            EventKind::AnalysisCompleted,
            EventKind::Error,
            EventKind::SkillError,
            EventKind::End,
        ];
        for kind in kinds {
            assert_eq!(EventKind::parse(kind.label()), Some(kind));
        }
    }

    #[test]
    fn only_completion_and_error_are_terminal() {
        assert!(EventKind::AnalysisCompleted.is_terminal());
        assert!(EventKind::Error.is_terminal());
        assert!(!EventKind::End.is_terminal());
        assert!(!EventKind::SkillError.is_terminal());
    }

    #[test]
    fn unknown_types_do_not_parse() {
        assert_eq!(EventKind::parse("heartbeat"), None);
        assert_eq!(EventKind::parse(""), None);
    }

    #[test]
    fn event_data_ignores_non_objects() {
        let payload = serde_json::json!({ "data": "oops" });
        assert!(event_data(&payload).is_null());
        let payload = serde_json::json!({ "data": { "a": 1 } });
        assert_eq!(fields::read_number(event_data(&payload), "a"), Some(1.0));
    }
}
