use super::*;
use pretty_assertions::assert_eq;

fn skill_error(skill: &str, step: &str, error: Value) -> Value {
    json!({ "skillId": skill, "data": { "stepId": step, "error": error } })
}

#[test]
fn three_skill_errors_produce_one_summary_at_completion() {
    let mut session = Session::new();
    session.send("skill_error", skill_error("jank", "frames", json!("sql timeout")));
    session.send("skill_error", skill_error("cpu", "freq", json!({ "message": "no cpufreq" })));
    session.send("skill_error", skill_error("jank", "threads", json!("bad column")));
    assert!(session.tagged(FlowTag::ErrorSummary).is_empty());
    assert_eq!(session.state.errors.len(), 3);

    session.send("analysis_completed", json!({ "data": { "answer": "ok" } }));

    let summary = session.single(FlowTag::ErrorSummary);
    assert_eq!(summary.role, MessageRole::System);
    assert!(summary.content.starts_with("⚠️ 分析过程中有 3 个技能步骤出错"));
    for needle in ["frames: sql timeout", "freq: no cpufreq", "threads: bad column"] {
        assert!(summary.content.contains(needle), "missing {needle}");
    }
    let jank = summary.content.find("**jank** (2)").expect("jank group");
    let cpu = summary.content.find("**cpu** (1)").expect("cpu group");
    assert!(jank < cpu);
    assert!(session.state.errors.is_empty());
}

#[test]
fn summary_follows_the_final_answer() {
    let mut session = Session::new();
    session.send("skill_error", skill_error("jank", "frames", json!("x")));
    session.send("analysis_completed", json!({ "data": { "answer": "ok" } }));

    let tags: Vec<Option<FlowTag>> = session.log.messages().iter().map(|m| m.flow_tag).collect();
    assert_eq!(
        tags,
        vec![Some(FlowTag::StreamingAnswer), Some(FlowTag::ErrorSummary)]
    );
}

#[test]
fn fatal_error_still_flushes_collected_errors() {
    let mut session = Session::new();
    session.send("skill_error", json!({ "data": {} }));
    let outcome = session.send("error", json!({ "data": { "error": { "message": "trace processor crashed" } } }));

    assert!(outcome.is_terminal);
    assert!(outcome.stop_loading);
    assert_eq!(
        session.single(FlowTag::Failure).content,
        "❌ 分析失败：trace processor crashed"
    );
    let summary = session.single(FlowTag::ErrorSummary);
    assert!(summary.content.contains("**unknown** (1)"));
    assert!(summary.content.contains("未知错误"));
    assert_eq!(session.state.lifecycle, SessionLifecycle::Failed);
}

#[test]
fn end_keeps_collected_errors() {
    let mut session = Session::new();
    session.send("skill_error", skill_error("jank", "frames", json!("x")));
    session.send("end", json!({}));
    assert!(session.tagged(FlowTag::ErrorSummary).is_empty());
    assert_eq!(session.state.errors.len(), 1);
}

#[test]
fn no_summary_without_errors() {
    let mut session = Session::new();
    session.send("analysis_completed", json!({ "data": { "answer": "ok" } }));
    assert!(session.tagged(FlowTag::ErrorSummary).is_empty());
}
