use serde_json::Value;
use tracing::info;
use tracing::warn;

use super::answer;
use super::conversation;
use super::conversation::FlushMode;
use super::errors;
use super::flow;
use crate::config::ContractConfig;
use crate::contract;
use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::state::FlowStatus;
use crate::state::SessionLifecycle;
use crate::state::SessionState;

const EMPTY_RESULT: &str = "分析已完成，但未返回结论。";

pub(super) fn handle_analysis_completed(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);

    let timeline = fields::read_aliased(data, &["conversationTimeline", "conversation_timeline"])
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    conversation::ingest_backfill(state, timeline);
    close_flow(state, FlowStatus::Completed, now_ms, effects);

    let text = final_text(data, &state.config.contract);
    let report_url = fields::read_opt_string(data, "reportUrl");
    answer::apply_final_answer(state, text, report_url, now_ms, effects);

    errors::flush_error_summary(state, now_ms, effects);
    state.lifecycle = SessionLifecycle::Completed;
    info!(session_id = %state.session_id, "analysis completed");
}

pub(super) fn handle_error(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let message = fields::error_text(fields::field(data, "error"))
        .or_else(|| fields::error_text(fields::field(payload, "error")))
        .or_else(|| fields::read_opt_string(data, "message"))
        .unwrap_or_else(|| "未知错误".to_string());
    warn!(session_id = %state.session_id, error = %message, "analysis failed");

    close_flow(state, FlowStatus::Failed, now_ms, effects);
    answer::fail_answer(state, now_ms, effects);

    let id = state.next_message_id();
    effects.push(SessionEffect::AddMessage(
        Message::new(id, MessageRole::Assistant, format!("❌ 分析失败：{message}"), now_ms)
            .tagged(FlowTag::Failure),
    ));

    errors::flush_error_summary(state, now_ms, effects);
    state.lifecycle = SessionLifecycle::Failed;
}

/// Stream end without a verdict: flush whatever is still open. Collected
/// errors are kept for a later terminal event.
pub(super) fn handle_end(state: &mut SessionState, now_ms: i64, effects: &mut Vec<SessionEffect>) {
    if state.flow.status == FlowStatus::Running {
        close_flow(state, FlowStatus::Completed, now_ms, effects);
    }
    answer::finish_answer(state, now_ms, effects);
}

fn close_flow(
    state: &mut SessionState,
    status: FlowStatus,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    conversation::flush_conversation(state, FlushMode::Forced, now_ms);
    if !state.flow.status.is_terminal() {
        state.flow.status = status;
    }
    flow::sync_flow_message(state, now_ms, effects);
}

/// Contract rendering wins over the plain answer text. Hypotheses follow
/// either; the confidence footer only accompanies plain answers.
fn final_text(data: &Value, config: &ContractConfig) -> String {
    let contract_source = fields::read_aliased(data, &["conclusionContract", "conclusion_contract"])
        .filter(|v| v.is_object())
        .or_else(|| fields::field(data, "conclusion").filter(|v| contract::looks_like_contract(v)));

    let mut sections = Vec::new();
    match contract_source {
        Some(source) => sections.push(contract::render_contract(source, config)),
        None => {
            if let Some(answer) = fields::read_first_string(data, &["answer", "conclusion", "summary"]) {
                sections.push(answer);
            }
        }
    }

    let hypotheses = render_hypotheses(fields::read_array(data, "hypotheses"));
    if !hypotheses.is_empty() {
        sections.push(hypotheses);
    }

    if contract_source.is_none() {
        let mut footer = Vec::new();
        if let Some(raw) = fields::read_number(data, "confidence") {
            footer.push(format!(
                "置信度: {}",
                contract::format_percent(contract::normalize_confidence(raw))
            ));
        }
        if let Some(rounds) = fields::read_u64(data, "rounds") {
            footer.push(format!("分析轮次: {rounds}"));
        }
        if !footer.is_empty() && !sections.is_empty() {
            sections.push(format!("_{}_", footer.join(" · ")));
        }
    }

    if sections.is_empty() {
        return EMPTY_RESULT.to_string();
    }
    sections.join("\n\n").trim_end().to_string()
}

fn render_hypotheses(items: &[Value]) -> String {
    let lines: Vec<String> = items
        .iter()
        .filter_map(|item| {
            let text = match item {
                Value::Object(_) => fields::read_first_string(item, &["description", "statement"])?,
                other => fields::as_text(other)?,
            };
            let mut line = format!("- {text}");
            if let Some(status) = fields::read_opt_string(item, "status") {
                line.push_str(&format!(" [{status}]"));
            }
            if let Some(raw) = fields::read_number(item, "confidence") {
                line.push_str(&format!(
                    "（{}）",
                    contract::format_percent(contract::normalize_confidence(raw))
                ));
            }
            Some(line)
        })
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    format!("## 假设\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_answer_gets_confidence_footer() {
        let text = final_text(
            &json!({ "answer": "主线程阻塞", "confidence": 0.82, "rounds": 2 }),
            &ContractConfig::default(),
        );
        assert_eq!(text, "主线程阻塞\n\n_置信度: 82% · 分析轮次: 2_");
    }

    #[test]
    fn empty_completion_renders_placeholder() {
        assert_eq!(final_text(&json!({}), &ContractConfig::default()), EMPTY_RESULT);
        assert_eq!(
            final_text(&json!({ "confidence": 0.5 }), &ContractConfig::default()),
            EMPTY_RESULT
        );
    }

    #[test]
    fn hypotheses_follow_the_answer() {
        let text = final_text(
            &json!({
                "answer": "GC 频繁",
                "hypotheses": [
                    { "description": "内存抖动", "status": "confirmed", "confidence": 90 },
                    { "noise": true },
                ],
            }),
            &ContractConfig::default(),
        );
        assert_eq!(text, "GC 频繁\n\n## 假设\n- 内存抖动 [confirmed]（90%）");
    }

    #[test]
    fn contract_wins_and_suppresses_footer() {
        let text = final_text(
            &json!({
                "answer": "ignored",
                "confidence": 0.9,
                "conclusionContract": { "conclusions": [{ "statement": "RenderThread 过载" }] },
            }),
            &ContractConfig::default(),
        );
        assert!(text.starts_with("## 结论（按可能性排序）\n1. RenderThread 过载"));
        assert!(!text.contains("ignored"));
        assert!(!text.contains("_置信度"));
    }
}
