use serde_json::Value;
use tracing::debug;

use crate::config::AnswerConfig;
use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessagePatch;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::state::AnswerStatus;
use crate::state::SessionState;
use crate::state::StreamingAnswerState;

const SENTENCE_END: &[char] = &['.', '!', '?', '。', '！', '？', '…', ';', '；'];

pub(super) fn handle_answer_token(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.answer.status.is_terminal() {
        debug!("answer token after stream close ignored");
        return;
    }
    let data = event_data(payload);
    // Tokens are taken verbatim; whitespace is significant.
    let token = ["token", "delta"]
        .iter()
        .find_map(|key| fields::field(data, key).and_then(Value::as_str))
        .unwrap_or("");
    if !token.is_empty() {
        state.answer.pending.push_str(token);
        state.answer.status = AnswerStatus::Streaming;
    }

    if fields::read_bool(data, "done") {
        flush_answer(state, now_ms, effects);
        state.answer.status = AnswerStatus::Completed;
        return;
    }
    if should_flush(&state.answer, &state.config.answer, now_ms) {
        flush_answer(state, now_ms, effects);
    }
}

fn should_flush(answer: &StreamingAnswerState, config: &AnswerConfig, now_ms: i64) -> bool {
    let pending = answer.pending.as_str();
    if pending.is_empty() {
        return false;
    }
    if pending.contains('\n') || pending.trim_end().ends_with(SENTENCE_END) {
        return true;
    }
    if pending.chars().count() >= config.flush_chars {
        return true;
    }
    match answer.last_flush_ms {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= config.flush_interval_ms,
    }
}

/// Moves `pending` into `content` and renders the answer message.
fn flush_answer(state: &mut SessionState, now_ms: i64, effects: &mut Vec<SessionEffect>) {
    if state.answer.pending.is_empty() {
        return;
    }
    let pending = std::mem::take(&mut state.answer.pending);
    state.answer.content.push_str(&pending);
    state.answer.last_flush_ms = Some(now_ms);

    let content = state.answer.content.clone();
    match state.answer.message_id.clone() {
        Some(id) => effects.push(SessionEffect::UpdateMessage {
            id,
            patch: MessagePatch::content(content),
        }),
        None => {
            let id = state.next_message_id();
            state.answer.message_id = Some(id.clone());
            effects.push(SessionEffect::AddMessage(
                Message::new(id, MessageRole::Assistant, content, now_ms)
                    .tagged(FlowTag::StreamingAnswer),
            ));
        }
    }
}

/// Replaces whatever was streamed with the authoritative text.
pub(super) fn apply_final_answer(
    state: &mut SessionState,
    text: String,
    report_url: Option<String>,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let answer = &mut state.answer;
    answer.pending.clear();
    answer.content = text.clone();
    answer.status = AnswerStatus::Completed;
    answer.last_flush_ms = Some(now_ms);

    match answer.message_id.clone() {
        Some(id) => effects.push(SessionEffect::UpdateMessage {
            id,
            patch: MessagePatch {
                content: Some(text),
                report_url,
                flow_tag: None,
            },
        }),
        None => {
            let id = state.next_message_id();
            state.answer.message_id = Some(id.clone());
            let mut message = Message::new(id, MessageRole::Assistant, text, now_ms)
                .tagged(FlowTag::StreamingAnswer);
            message.report_url = report_url;
            effects.push(SessionEffect::AddMessage(message));
        }
    }
}

/// Renders the last buffered tokens and marks the stream failed.
pub(super) fn fail_answer(state: &mut SessionState, now_ms: i64, effects: &mut Vec<SessionEffect>) {
    if state.answer.status.is_terminal() {
        return;
    }
    flush_answer(state, now_ms, effects);
    state.answer.status = AnswerStatus::Failed;
}

/// Closes a stream that never saw `done`.
pub(super) fn finish_answer(
    state: &mut SessionState,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.answer.status != AnswerStatus::Streaming {
        return;
    }
    flush_answer(state, now_ms, effects);
    state.answer.status = AnswerStatus::Completed;
}
