//! Reorder buffer for `conversation_step` events.
//!
//! Steps are drained in strict ordinal order. The one exception is the
//! forced flush at stream termination, which drains past missing ordinals.

use serde_json::Value;
use tracing::debug;

use super::flow;
use crate::event::event_data;
use crate::fields;
use crate::message::SessionEffect;
use crate::state::ConversationStepItem;
use crate::state::SessionState;
use crate::state::StepPhase;
use crate::state::StepRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// At most one pop, gated on the phase gap since the last flush.
    Paced,
    /// Drains everything pending, in ordinal order, ignoring gaps.
    Forced,
}

pub(super) fn handle_conversation_step(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    if state.flow.status.is_terminal() {
        debug!("conversation step after flow close ignored");
        return;
    }
    let data = event_data(payload);
    let event_id =
        fields::read_opt_string(payload, "id").or_else(|| fields::read_opt_string(data, "eventId"));
    if admit(state, event_id.as_deref(), data) {
        flow::mark_running(&mut state.flow);
    }
    if flush_conversation(state, FlushMode::Paced, now_ms) {
        flow::sync_flow_message(state, now_ms, effects);
    }
}

/// Re-evaluates the pacing gate on an unrelated event so a held step does not
/// wait for the next conversation step.
pub(super) fn tick(state: &mut SessionState, now_ms: i64, effects: &mut Vec<SessionEffect>) {
    if state.flow.status.is_terminal() || state.flow.conversation_pending_steps.is_empty() {
        return;
    }
    if flush_conversation(state, FlushMode::Paced, now_ms) {
        flow::sync_flow_message(state, now_ms, effects);
    }
}

/// Feeds `conversationTimeline` items through the same admission path as
/// live steps. Items already seen or already flushed are dropped.
pub(super) fn ingest_backfill(state: &mut SessionState, items: &[Value]) -> usize {
    if state.flow.status.is_terminal() {
        debug!("conversation timeline backfill after flow close ignored");
        return 0;
    }
    let mut admitted = 0;
    for item in items.iter().filter(|item| item.is_object()) {
        let event_id = fields::read_first_string(item, &["eventId", "id"]);
        if admit(state, event_id.as_deref(), item) {
            admitted += 1;
        }
    }
    if admitted > 0 {
        debug!(admitted, "conversation timeline backfill admitted");
    }
    admitted
}

/// Returns `true` if the step was stored as pending.
fn admit(state: &mut SessionState, event_id: Option<&str>, step: &Value) -> bool {
    let flow = &mut state.flow;
    if let Some(id) = event_id {
        if !flow.conversation_seen_event_ids.insert(id) {
            debug!(event_id = id, "duplicate conversation step dropped");
            return false;
        }
    }

    let ordinal = match fields::read_u64(step, "ordinal").filter(|n| *n > 0) {
        Some(ordinal) => ordinal,
        None => {
            let highest = flow
                .highest_pending_ordinal()
                .unwrap_or(0)
                .max(flow.conversation_last_ordinal);
            let Some(next) = highest.checked_add(1) else {
                debug!(highest, "no ordinal left for legacy conversation step");
                return false;
            };
            next
        }
    };
    if ordinal <= flow.conversation_last_ordinal {
        debug!(
            ordinal,
            last = flow.conversation_last_ordinal,
            "stale conversation step dropped"
        );
        return false;
    }
    if flow.conversation_pending_steps.contains_key(&ordinal) {
        debug!(ordinal, "conversation ordinal already pending");
        return false;
    }

    let item = ConversationStepItem {
        ordinal,
        phase: StepPhase::parse(&fields::read_string(step, "phase")),
        role: StepRole::parse(&fields::read_string(step, "role")),
        text: step_text(step),
    };
    flow.conversation_pending_steps.insert(ordinal, item);
    true
}

fn step_text(step: &Value) -> String {
    fields::read_path(step, &["content", "text"])
        .and_then(fields::as_text)
        .or_else(|| fields::read_first_string(step, &["content", "text", "message"]))
        .map(|text| text.trim().replace('\n', " "))
        .unwrap_or_default()
}

/// Moves ready steps into the transcript. Returns `true` if any line was added.
pub(super) fn flush_conversation(state: &mut SessionState, mode: FlushMode, now_ms: i64) -> bool {
    let gaps = state.config.pacing.clone();
    let flow = &mut state.flow;
    let mut flushed = 0usize;

    match mode {
        FlushMode::Paced => {
            let Some(next) = flow.conversation_last_ordinal.checked_add(1) else {
                return false;
            };
            let Some(item) = flow.conversation_pending_steps.get(&next) else {
                return false;
            };
            let ready = match flow.conversation_last_flush_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= gaps.gap_ms(item.phase),
            };
            if !ready {
                return false;
            }
            if let Some(item) = flow.conversation_pending_steps.remove(&next) {
                flow.conversation_lines.push(item.render_line());
                flow.conversation_last_ordinal = item.ordinal;
                flushed += 1;
            }
        }
        FlushMode::Forced => {
            let mut ordinals: Vec<u64> = flow.conversation_pending_steps.keys().copied().collect();
            ordinals.sort_unstable();
            for ordinal in ordinals {
                if let Some(item) = flow.conversation_pending_steps.remove(&ordinal) {
                    let expected = flow.conversation_last_ordinal.saturating_add(1);
                    if ordinal != expected {
                        debug!(
                            ordinal,
                            expected,
                            "forced flush skipped a missing ordinal"
                        );
                    }
                    flow.conversation_lines.push(item.render_line());
                    flow.conversation_last_ordinal = ordinal;
                    flushed += 1;
                }
            }
        }
    }

    if flushed > 0 {
        flow.conversation_last_flush_ms = Some(now_ms);
    }
    flushed > 0
}
