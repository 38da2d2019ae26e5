use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::state::ActiveIntervention;
use crate::state::InterventionAction;
use crate::state::InterventionContext;
use crate::state::InterventionOption;
use crate::state::InterventionOutcome;
use crate::state::InterventionPoint;
use crate::state::InterventionResolution;
use crate::state::InterventionType;
use crate::state::SessionState;

pub(super) fn handle_required(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let message_id = state.next_message_id();
    let point = sanitize_point(
        data,
        &message_id,
        state.config.intervention.default_timeout_ms,
    );

    if let Some(previous) = state.intervention.active.take() {
        warn!(
            previous = %previous.point.intervention_id,
            next = %point.intervention_id,
            "intervention replaced before it was resolved"
        );
    }

    let mut message = Message::new(
        message_id.clone(),
        MessageRole::Assistant,
        render_request(&point),
        now_ms,
    )
    .tagged(FlowTag::Intervention);
    message.intervention = Some(point.clone());
    effects.push(SessionEffect::AddMessage(message));

    state.intervention.active = Some(ActiveIntervention {
        point,
        message_id,
        requested_at_ms: now_ms,
    });
}

pub(super) fn handle_resolved(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let action = fields::read_opt_string(data, "action")
        .unwrap_or_else(|| InterventionAction::Continue.label().to_string());
    let Some(active) = take_matching(state, data) else {
        return;
    };
    let label = option_label(&active.point, &action);
    close(
        state,
        active,
        InterventionResolution::Resolved { action },
        format!("✅ 已选择：{label}"),
        now_ms,
        effects,
    );
}

pub(super) fn handle_timeout(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let Some(active) = take_matching(state, data) else {
        return;
    };
    let default_action = fields::read_opt_string(data, "defaultAction")
        .unwrap_or_else(|| default_action(&active.point).label().to_string());
    let label = option_label(&active.point, &default_action);
    close(
        state,
        active,
        InterventionResolution::TimedOut { default_action },
        format!("⏱️ 等待超时，已按默认操作继续：{label}"),
        now_ms,
        effects,
    );
}

/// Takes the active record if the event refers to it. Events without an id
/// apply to whatever is active.
fn take_matching(state: &mut SessionState, data: &Value) -> Option<ActiveIntervention> {
    let Some(active) = state.intervention.active.as_ref() else {
        debug!("intervention outcome without active intervention ignored");
        return None;
    };
    if let Some(id) = fields::read_opt_string(data, "interventionId") {
        if id != active.point.intervention_id {
            warn!(
                received = %id,
                active = %active.point.intervention_id,
                "intervention outcome for a different intervention ignored"
            );
            return None;
        }
    }
    state.intervention.active.take()
}

fn close(
    state: &mut SessionState,
    active: ActiveIntervention,
    resolution: InterventionResolution,
    content: String,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    debug!(
        intervention_id = %active.point.intervention_id,
        waited_ms = now_ms.saturating_sub(active.requested_at_ms),
        "intervention closed"
    );
    state.intervention.last_outcome = Some(InterventionOutcome {
        intervention_id: active.point.intervention_id,
        resolution,
        at_ms: now_ms,
    });
    let id = state.next_message_id();
    effects.push(SessionEffect::AddMessage(
        Message::new(id, MessageRole::System, content, now_ms).tagged(FlowTag::InterventionOutcome),
    ));
}

pub(super) fn sanitize_point(
    data: &Value,
    message_id: &str,
    default_timeout_ms: u64,
) -> InterventionPoint {
    let intervention_id = fields::read_opt_string(data, "interventionId")
        .unwrap_or_else(|| format!("intervention-{message_id}"));
    let options = fields::read_array(data, "options")
        .iter()
        .enumerate()
        .map(|(idx, raw)| sanitize_option(idx + 1, raw))
        .collect();
    let context = fields::field(data, "context")
        .map(sanitize_context)
        .unwrap_or_default();
    let timeout_ms = fields::read_u64(data, "timeout")
        .or_else(|| fields::read_u64(data, "timeoutMs"))
        .unwrap_or(default_timeout_ms);

    InterventionPoint {
        intervention_id,
        kind: InterventionType::parse(&fields::read_string(data, "type")),
        options,
        context,
        timeout_ms,
    }
}

/// `position` is 1-based. Non-object entries become fully defaulted options.
fn sanitize_option(position: usize, raw: &Value) -> InterventionOption {
    InterventionOption {
        id: fields::read_opt_string(raw, "id").unwrap_or_else(|| format!("option_{position}")),
        label: fields::read_opt_string(raw, "label").unwrap_or_else(|| format!("选项 {position}")),
        action: InterventionAction::parse(&fields::read_string(raw, "action")),
        description: fields::read_opt_string(raw, "description"),
        recommended: fields::read_bool(raw, "recommended"),
    }
}

fn sanitize_context(raw: &Value) -> InterventionContext {
    InterventionContext {
        confidence: fields::read_number_or(raw, "confidence", 0.0),
        elapsed_time_ms: fields::read_u64(raw, "elapsedTimeMs").unwrap_or(0),
        rounds_completed: fields::read_u64(raw, "roundsCompleted").unwrap_or(0),
        progress_summary: fields::read_string(raw, "progressSummary"),
        trigger_reason: fields::read_string(raw, "triggerReason"),
        findings_count: fields::read_u64(raw, "findingsCount").unwrap_or(0),
    }
}

fn default_action(point: &InterventionPoint) -> InterventionAction {
    point
        .options
        .iter()
        .find(|option| option.recommended)
        .map(|option| option.action)
        .unwrap_or(InterventionAction::Continue)
}

/// Label of the option picked by `choice`, matched by option id first and
/// then by action name.
fn option_label(point: &InterventionPoint, choice: &str) -> String {
    point
        .options
        .iter()
        .find(|option| option.id == choice)
        .or_else(|| {
            point
                .options
                .iter()
                .find(|option| option.action.label() == choice)
        })
        .map(|option| option.label.clone())
        .unwrap_or_else(|| choice.to_string())
}

fn render_request(point: &InterventionPoint) -> String {
    let mut out = format!("⏸️ **{}**", point.kind.label());
    let context = &point.context;
    if !context.trigger_reason.trim().is_empty() {
        out.push_str(&format!("\n{}", context.trigger_reason.trim()));
    }
    if !context.progress_summary.trim().is_empty() {
        out.push_str(&format!("\n\n进展: {}", context.progress_summary.trim()));
    }
    if context.rounds_completed > 0 || context.findings_count > 0 {
        out.push_str(&format!(
            "\n已完成 {} 轮，发现 {} 项",
            context.rounds_completed, context.findings_count
        ));
    }

    if !point.options.is_empty() {
        out.push_str("\n\n可选操作:");
        for (idx, option) in point.options.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", idx + 1, option.label));
            if option.recommended {
                out.push_str("（推荐）");
            }
            if let Some(description) = &option.description {
                out.push_str(&format!("：{description}"));
            }
        }
    }

    let seconds = point.timeout_ms / 1000;
    if seconds > 0 {
        out.push_str(&format!("\n\n{seconds} 秒内未选择将按默认操作继续"));
    }
    out
}
