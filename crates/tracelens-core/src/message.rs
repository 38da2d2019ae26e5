use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::state::InterventionPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Assistant,
    System,
}

/// Marks messages that are updated in place or that a host renders specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowTag {
    StreamingFlow,
    StreamingAnswer,
    Plan,
    Artifact,
    Intervention,
    InterventionOutcome,
    ErrorSummary,
    Failure,
}

impl FlowTag {
    pub fn label(self) -> &'static str {
        match self {
            Self::StreamingFlow => "streaming_flow",
            Self::StreamingAnswer => "streaming_answer",
            Self::Plan => "plan",
            Self::Artifact => "artifact",
            Self::Intervention => "intervention",
            Self::InterventionOutcome => "intervention_outcome",
            Self::ErrorSummary => "error_summary",
            Self::Failure => "failure",
        }
    }
}

/// Tabular payload carried next to an artifact message. Rendering is up to the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePayload {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expandable_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_tag: Option<FlowTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention: Option<InterventionPoint>,
    pub created_at_ms: i64,
}

impl Message {
    pub fn new(id: String, role: MessageRole, content: String, created_at_ms: i64) -> Self {
        Self {
            id,
            role,
            content,
            flow_tag: None,
            report_url: None,
            sql: None,
            table: None,
            intervention: None,
            created_at_ms,
        }
    }

    pub fn tagged(mut self, tag: FlowTag) -> Self {
        self.flow_tag = Some(tag);
        self
    }
}

/// Partial update. Only `Some` fields are applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_tag: Option<FlowTag>,
}

impl MessagePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionEffect {
    AddMessage(Message),
    UpdateMessage { id: String, patch: MessagePatch },
}

/// Reference collaborator: applies effects in order to an in-memory list.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, effect: SessionEffect) {
        match effect {
            SessionEffect::AddMessage(message) => self.messages.push(message),
            SessionEffect::UpdateMessage { id, patch } => {
                let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
                    warn!(message_id = %id, "update for unknown message ignored");
                    return;
                };
                if let Some(content) = patch.content {
                    message.content = content;
                }
                if let Some(report_url) = patch.report_url {
                    message.report_url = Some(report_url);
                }
                if let Some(tag) = patch.flow_tag {
                    message.flow_tag = Some(tag);
                }
            }
        }
    }

    pub fn apply_all(&mut self, effects: impl IntoIterator<Item = SessionEffect>) {
        for effect in effects {
            self.apply(effect);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn with_tag(&self, tag: FlowTag) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .filter(move |m| m.flow_tag == Some(tag))
    }

    pub fn first_with_tag(&self, tag: FlowTag) -> Option<&Message> {
        self.with_tag(tag).next()
    }
}
