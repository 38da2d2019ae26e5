use serde_json::Value;
use tracing::debug;

use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessagePatch;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::state::FlowStatus;
use crate::state::SessionState;
use crate::state::StreamingFlowState;

const MAX_LINE_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FlowLane {
    Phases,
    Thoughts,
    Tools,
    Outputs,
}

impl FlowLane {
    fn label(self) -> &'static str {
        match self {
            Self::Phases => "阶段",
            Self::Thoughts => "思考",
            Self::Tools => "工具",
            Self::Outputs => "输出",
        }
    }
}

pub(super) fn handle_progress(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    if let Some(plan) = fields::field(data, "plan").filter(|plan| plan.is_object()) {
        sync_plan_message(state, plan, now_ms, effects);
    }

    let phase = fields::read_opt_string(data, "phase");
    let message = fields::read_first_string(data, &["message", "content"]);
    let line = match (phase, message) {
        (Some(phase), Some(message)) => format!("{phase}: {message}"),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => return,
    };
    push_line(state, FlowLane::Phases, line, now_ms, effects);
}

pub(super) fn handle_thought(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    if let Some(text) = fields::read_first_string(data, &["content", "thought", "message"]) {
        push_line(state, FlowLane::Thoughts, text, now_ms, effects);
    }
}

pub(super) fn handle_tool_call(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let tool = fields::read_first_string(data, &["toolName", "tool", "agentId", "agent"]);
    let detail = fields::read_first_string(data, &["message", "description", "task"]);
    let line = match (tool, detail) {
        (Some(tool), Some(detail)) => format!("{tool}: {detail}"),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => return,
    };
    push_line(state, FlowLane::Tools, line, now_ms, effects);
}

pub(super) fn handle_agent_output(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    if let Some(text) = fields::read_first_string(data, &["summary", "message", "content", "text"])
    {
        push_line(state, FlowLane::Outputs, text, now_ms, effects);
    }
}

/// Appends one line to a lane and re-renders the flow message. Consecutive
/// repeats of the same line are collapsed.
pub(super) fn push_line(
    state: &mut SessionState,
    lane: FlowLane,
    line: String,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.flow.status.is_terminal() {
        debug!(lane = lane.label(), "flow is frozen; line dropped");
        return;
    }
    let line = clip(&line, MAX_LINE_CHARS);
    let buffer = match lane {
        FlowLane::Phases => &mut state.flow.phases,
        FlowLane::Thoughts => &mut state.flow.thoughts,
        FlowLane::Tools => &mut state.flow.tools,
        FlowLane::Outputs => &mut state.flow.outputs,
    };
    if buffer.last() == Some(&line) {
        return;
    }
    buffer.push(line);
    mark_running(&mut state.flow);
    sync_flow_message(state, now_ms, effects);
}

pub(super) fn mark_running(flow: &mut StreamingFlowState) {
    if flow.status == FlowStatus::Idle {
        flow.status = FlowStatus::Running;
    }
}

/// Adds the flow message on first content, then patches it whenever the
/// rendered text changes.
pub(super) fn sync_flow_message(
    state: &mut SessionState,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.flow.message_id.is_none() && !state.flow.has_content() {
        return;
    }
    let rendered = render_flow(&state.flow);
    if rendered == state.flow.last_rendered {
        return;
    }
    state.flow.last_rendered = rendered.clone();

    if let Some(id) = state.flow.message_id.clone() {
        effects.push(SessionEffect::UpdateMessage {
            id,
            patch: MessagePatch::content(rendered),
        });
    } else {
        let id = state.next_message_id();
        state.flow.message_id = Some(id.clone());
        effects.push(SessionEffect::AddMessage(
            Message::new(id, MessageRole::Assistant, rendered, now_ms)
                .tagged(FlowTag::StreamingFlow),
        ));
    }
}

pub(super) fn render_flow(flow: &StreamingFlowState) -> String {
    let status = match flow.status {
        FlowStatus::Idle => "等待中",
        FlowStatus::Running => "进行中",
        FlowStatus::Completed => "已完成",
        FlowStatus::Failed => "已中断",
    };
    let mut out = format!("**分析过程** · {status}\n");

    for (lane, buffer) in [
        (FlowLane::Phases, &flow.phases),
        (FlowLane::Thoughts, &flow.thoughts),
        (FlowLane::Tools, &flow.tools),
        (FlowLane::Outputs, &flow.outputs),
    ] {
        if buffer.is_empty() {
            continue;
        }
        out.push_str(&format!("\n**{}**\n", lane.label()));
        for line in buffer.iter() {
            out.push_str(&format!("- {line}\n"));
        }
    }

    if !flow.conversation_lines.is_empty() {
        out.push_str("\n**对话**\n");
        for line in flow.conversation_lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}

fn sync_plan_message(
    state: &mut SessionState,
    plan: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let rendered = render_plan(plan);
    if let Some(id) = state.plan_message_id.clone() {
        effects.push(SessionEffect::UpdateMessage {
            id,
            patch: MessagePatch::content(rendered),
        });
        return;
    }
    let id = state.next_message_id();
    state.plan_message_id = Some(id.clone());
    effects.push(SessionEffect::AddMessage(
        Message::new(id, MessageRole::Assistant, rendered, now_ms).tagged(FlowTag::Plan),
    ));
}

fn render_plan(plan: &Value) -> String {
    let mut out = String::from("**分析计划**\n");
    if let Some(objective) = fields::read_opt_string(plan, "objective") {
        out.push_str(&format!("目标: {objective}\n"));
    }
    let mode = fields::read_opt_string(plan, "mode");
    let strategy = fields::read_opt_string(plan, "strategy");
    match (mode, strategy) {
        (Some(mode), Some(strategy)) => out.push_str(&format!("模式: {mode} · 策略: {strategy}\n")),
        (Some(mode), None) => out.push_str(&format!("模式: {mode}\n")),
        (None, Some(strategy)) => out.push_str(&format!("策略: {strategy}\n")),
        (None, None) => {}
    }

    let steps = fields::read_string_array(plan, "steps");
    if !steps.is_empty() {
        out.push('\n');
        for (idx, step) in steps.iter().enumerate() {
            out.push_str(&format!("{}. {step}\n", idx + 1));
        }
    }

    let evidence = fields::read_string_array(plan, "evidence");
    if !evidence.is_empty() {
        out.push_str("\n依据:\n");
        for item in &evidence {
            out.push_str(&format!("- {item}\n"));
        }
    }

    out.trim_end().to_string()
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}
