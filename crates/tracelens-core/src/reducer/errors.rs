use chrono::DateTime;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::state::CollectedError;
use crate::state::SessionState;

pub(super) fn handle_skill_error(state: &mut SessionState, payload: &Value, now_ms: i64) {
    let data = event_data(payload);
    let skill_id = fields::read_opt_string(payload, "skillId")
        .or_else(|| fields::read_opt_string(data, "skillId"))
        .unwrap_or_else(|| "unknown".to_string());
    let step_id = fields::read_opt_string(data, "stepId");
    let error = fields::error_text(fields::field(data, "error"))
        .or_else(|| fields::read_opt_string(data, "message"))
        .unwrap_or_else(|| "未知错误".to_string());

    warn!(
        skill_id = %skill_id,
        step_id = step_id.as_deref().unwrap_or("-"),
        error = %error,
        "skill error collected"
    );
    state.errors.push(CollectedError {
        skill_id,
        step_id,
        error,
        timestamp_ms: now_ms,
    });
}

/// Renders one grouped summary of the collected errors and empties the list.
/// Emits nothing when no errors were collected.
pub(super) fn flush_error_summary(
    state: &mut SessionState,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.errors.is_empty() {
        return;
    }
    let errors = state.errors.drain();
    let content = render_summary(&errors);
    let id = state.next_message_id();
    effects.push(SessionEffect::AddMessage(
        Message::new(id, MessageRole::System, content, now_ms).tagged(FlowTag::ErrorSummary),
    ));
}

fn render_summary(errors: &[CollectedError]) -> String {
    let mut by_skill: IndexMap<&str, Vec<&CollectedError>> = IndexMap::new();
    for error in errors {
        by_skill.entry(error.skill_id.as_str()).or_default().push(error);
    }

    let mut out = format!("⚠️ 分析过程中有 {} 个技能步骤出错", errors.len());
    for (skill, entries) in &by_skill {
        out.push_str(&format!("\n\n**{skill}** ({})", entries.len()));
        for entry in entries {
            let at = DateTime::<Utc>::from_timestamp_millis(entry.timestamp_ms)
                .map(|ts| ts.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "--:--:--".to_string());
            match &entry.step_id {
                Some(step) => out.push_str(&format!("\n- [{at}] {step}: {}", entry.error)),
                None => out.push_str(&format!("\n- [{at}] {}", entry.error)),
            }
        }
    }
    out
}
