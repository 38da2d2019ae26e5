use serde_json::Value;
use tracing::debug;

use super::flow;
use super::flow::FlowLane;
use crate::event::event_data;
use crate::fields;
use crate::message::FlowTag;
use crate::message::Message;
use crate::message::MessageRole;
use crate::message::SessionEffect;
use crate::message::TablePayload;
use crate::state::SessionState;

pub(super) fn handle_sql_executed(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let sql = fields::read_opt_string(data, "sql");
    let Some(result) = fields::field(data, "result").filter(|v| v.is_object()) else {
        debug!("sql_executed without result object ignored");
        return;
    };
    let table = table_from(result);
    let row_count = table.row_count;

    let mut content = format!("SQL 查询返回 {row_count} 行");
    if let Some(summary) = &table.summary {
        content.push_str(&format!("\n{summary}"));
    }
    let id = state.next_message_id();
    let mut message = Message::new(id, MessageRole::Assistant, content, now_ms).tagged(FlowTag::Artifact);
    message.sql = sql;
    message.table = Some(table);
    effects.push(SessionEffect::AddMessage(message));

    if !state.flow.status.is_terminal() {
        flow::push_line(
            state,
            FlowLane::Outputs,
            format!("SQL 返回 {row_count} 行"),
            now_ms,
            effects,
        );
    }
}

pub(super) fn handle_skill_layered_result(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let skill_id = skill_id(payload, data);
    let key = skill_id.as_ref().map(|id| format!("layered:{id}"));
    if !admit(state, key.as_deref()) {
        return;
    }

    let title = fields::read_opt_string(data, "skillName")
        .or(skill_id)
        .unwrap_or_else(|| "技能结果".to_string());
    let layers = fields::field(data, "layers")
        .or_else(|| fields::read_path(data, &["result", "layers"]))
        .filter(|v| v.is_object());

    let mut out = format!("**{title}**");
    if let Some(layers) = layers {
        if let Some(overview) = fields::read_object(layers, "overview") {
            let metrics: Vec<String> = overview
                .iter()
                .filter_map(|(name, value)| fields::as_text(value).map(|v| format!("- {name}: {v}")))
                .collect();
            if !metrics.is_empty() {
                out.push_str("\n\n概览:\n");
                out.push_str(&metrics.join("\n"));
            }
        }
        let list = entry_count(fields::field(layers, "list"));
        if list > 0 {
            out.push_str(&format!("\n\n明细表: {list} 个"));
        }
        let deep = entry_count(fields::field(layers, "deep"));
        if deep > 0 {
            out.push_str(&format!("\n深入分析: {deep} 项"));
        }
    }

    let diagnostics = diagnostic_lines(fields::read_array(data, "diagnostics"));
    if !diagnostics.is_empty() {
        out.push_str("\n\n诊断:\n");
        out.push_str(&diagnostics.join("\n"));
    }

    push_artifact(state, out, None, now_ms, effects);
}

pub(super) fn handle_skill_section(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let skill_id = skill_id(payload, data);
    let section_id = fields::read_first_string(data, &["sectionId", "stepId"]);
    let key = match (&skill_id, &section_id) {
        (Some(skill), Some(section)) => Some(format!("section:{skill}:{section}")),
        _ => None,
    };
    if !admit(state, key.as_deref()) {
        return;
    }

    let title = fields::read_first_string(data, &["title", "sectionTitle"])
        .or(section_id)
        .unwrap_or_else(|| "分析片段".to_string());
    let source = fields::field(data, "data").filter(|v| v.is_object()).unwrap_or(data);
    let table = has_table(source).then(|| table_from(source));
    let mut content = format!("**{title}**");
    if let Some(text) = fields::read_first_string(source, &["summary", "text"]) {
        content.push_str(&format!("\n{text}"));
    }
    push_artifact(state, content, table, now_ms, effects);
}

pub(super) fn handle_skill_diagnostics(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let data = event_data(payload);
    let lines = diagnostic_lines(fields::read_array(data, "diagnostics"));
    if lines.is_empty() {
        debug!("skill_diagnostics without entries ignored");
        return;
    }
    let skill_id = skill_id(payload, data);
    let step_id = fields::read_opt_string(data, "stepId");
    let key = match (&skill_id, &step_id) {
        (Some(skill), Some(step)) => Some(format!("diagnostics:{skill}:{step}")),
        _ => None,
    };
    if !admit(state, key.as_deref()) {
        return;
    }

    let title = skill_id.unwrap_or_else(|| "技能".to_string());
    let content = format!("**{title} 诊断**\n{}", lines.join("\n"));
    push_artifact(state, content, None, now_ms, effects);
}

pub(super) fn handle_data(
    state: &mut SessionState,
    payload: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let event_id = fields::read_opt_string(payload, "id");
    let envelope = fields::field(payload, "envelope")
        .or_else(|| fields::field(event_data(payload), "envelope"));
    let envelopes: Vec<&Value> = match envelope {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => {
            debug!(event_id = event_id.as_deref().unwrap_or(""), "data event without envelope");
            return;
        }
    };

    for (idx, envelope) in envelopes.into_iter().enumerate() {
        if !envelope.is_object() {
            continue;
        }
        let key = envelope_key(envelope, event_id.as_deref(), idx);
        if !admit(state, key.as_deref()) {
            continue;
        }
        render_envelope(state, envelope, now_ms, effects);
    }
}

/// `meta.source` wins, then `meta.skillId:meta.stepId`, then the record id
/// plus the envelope's position.
fn envelope_key(envelope: &Value, event_id: Option<&str>, idx: usize) -> Option<String> {
    let meta = fields::field(envelope, "meta").unwrap_or(envelope);
    if let Some(source) = fields::read_opt_string(meta, "source") {
        return Some(format!("envelope:{source}"));
    }
    let skill = fields::read_opt_string(meta, "skillId");
    let step = fields::read_opt_string(meta, "stepId");
    if let (Some(skill), Some(step)) = (skill, step) {
        return Some(format!("envelope:{skill}:{step}"));
    }
    event_id.map(|id| format!("envelope:{id}#{idx}"))
}

fn render_envelope(
    state: &mut SessionState,
    envelope: &Value,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let title = fields::read_path(envelope, &["display", "title"])
        .and_then(fields::as_text)
        .or_else(|| fields::read_path(envelope, &["meta", "stepId"]).and_then(fields::as_text))
        .unwrap_or_else(|| "数据".to_string());
    let body = fields::field(envelope, "data").unwrap_or(envelope);

    let mut content = format!("**{title}**");
    let table = if has_table(body) {
        Some(table_from(body))
    } else {
        let text = fields::read_first_string(body, &["text", "summary"])
            .or_else(|| fields::as_text(body))
            .or_else(|| fields::read_path(envelope, &["display", "summary"]).and_then(fields::as_text));
        if let Some(text) = text {
            content.push_str(&format!("\n{text}"));
        }
        None
    };
    push_artifact(state, content, table, now_ms, effects);
}

fn skill_id(payload: &Value, data: &Value) -> Option<String> {
    fields::read_opt_string(payload, "skillId").or_else(|| fields::read_opt_string(data, "skillId"))
}

/// Records the key. Returns `false` for a duplicate; keyless artifacts always pass.
fn admit(state: &mut SessionState, key: Option<&str>) -> bool {
    let Some(key) = key else {
        debug!("artifact without a dedup key rendered unconditionally");
        return true;
    };
    if state.dedup.insert_if_new(key) {
        true
    } else {
        debug!(key, "duplicate artifact dropped");
        false
    }
}

fn push_artifact(
    state: &mut SessionState,
    content: String,
    table: Option<TablePayload>,
    now_ms: i64,
    effects: &mut Vec<SessionEffect>,
) {
    let id = state.next_message_id();
    let mut message = Message::new(id, MessageRole::Assistant, content, now_ms).tagged(FlowTag::Artifact);
    message.table = table;
    effects.push(SessionEffect::AddMessage(message));
}

fn has_table(value: &Value) -> bool {
    fields::field(value, "rows").is_some_and(Value::is_array)
        || fields::field(value, "columns").is_some_and(Value::is_array)
}

fn entry_count(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

fn diagnostic_lines(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| {
            let message = match item {
                Value::Object(_) => fields::read_first_string(item, &["message", "text"])?,
                other => fields::as_text(other)?,
            };
            Some(match fields::read_opt_string(item, "severity") {
                Some(severity) => format!("- [{severity}] {message}"),
                None => format!("- {message}"),
            })
        })
        .collect()
}

/// Rows may be arrays (positional) or objects (mapped by column name).
/// Columns are inferred from the first object row when absent.
pub(super) fn table_from(result: &Value) -> TablePayload {
    let raw_rows = fields::read_array(result, "rows");
    let mut columns: Vec<String> = fields::read_array(result, "columns")
        .iter()
        .filter_map(|column| match column {
            Value::Object(_) => fields::read_first_string(column, &["name", "key", "title", "label"]),
            other => fields::as_text(other),
        })
        .collect();
    if columns.is_empty() {
        if let Some(first) = raw_rows.iter().find_map(Value::as_object) {
            columns = first.keys().cloned().collect();
        }
    }

    let rows: Vec<Vec<Value>> = raw_rows
        .iter()
        .filter_map(|row| match row {
            Value::Array(cells) => Some(cells.clone()),
            Value::Object(map) => Some(
                columns
                    .iter()
                    .map(|column| map.get(column).cloned().unwrap_or(Value::Null))
                    .collect(),
            ),
            _ => None,
        })
        .collect();

    let row_count = fields::read_u64(result, "rowCount").unwrap_or(rows.len() as u64);
    TablePayload {
        columns,
        rows,
        row_count,
        summary: fields::read_opt_string(result, "summary"),
        expandable_data: fields::field(result, "expandableData").cloned(),
    }
}
