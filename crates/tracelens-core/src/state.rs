use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::config::BufferConfig;
use crate::config::ReducerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new_uuid() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Progress,
    Thinking,
    Tool,
    Result,
    Error,
}

impl StepPhase {
    /// Unknown phases are narrated as progress.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "thinking" | "thought" => Self::Thinking,
            "tool" | "tool_call" => Self::Tool,
            "result" | "output" => Self::Result,
            "error" => Self::Error,
            _ => Self::Progress,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Thinking => "thinking",
            Self::Tool => "tool",
            Self::Result => "result",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Agent,
    System,
}

impl StepRole {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "system" => Self::System,
            _ => Self::Agent,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStepItem {
    pub ordinal: u64,
    pub phase: StepPhase,
    pub role: StepRole,
    pub text: String,
}

impl ConversationStepItem {
    pub fn render_line(&self) -> String {
        format!(
            "#{} [{}/{}] {}",
            self.ordinal,
            self.phase.label(),
            self.role.label(),
            self.text
        )
    }
}

/// Fixed-capacity line buffer; the oldest line is evicted first.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    cap: usize,
    buf: VecDeque<String>,
}

impl LineBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            buf: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(line.into());
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.buf.iter()
    }

    pub fn last(&self) -> Option<&String> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.buf.iter().cloned().collect()
    }
}

/// Bounded FIFO set of event ids already admitted.
#[derive(Debug, Clone)]
pub struct SeenEventIds {
    cap: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenEventIds {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Keys of artifacts already rendered in this session. Never pruned.
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    keys: HashSet<String>,
}

impl DedupCache {
    /// Returns `true` if the key was new and has now been recorded.
    pub fn insert_if_new(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string());
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamingFlowState {
    pub phases: LineBuffer,
    pub thoughts: LineBuffer,
    pub tools: LineBuffer,
    pub outputs: LineBuffer,
    pub conversation_pending_steps: HashMap<u64, ConversationStepItem>,
    pub conversation_last_ordinal: u64,
    pub conversation_lines: LineBuffer,
    pub conversation_seen_event_ids: SeenEventIds,
    pub conversation_last_flush_ms: Option<i64>,
    pub status: FlowStatus,
    pub message_id: Option<String>,
    pub last_rendered: String,
}

impl StreamingFlowState {
    pub fn new(buffers: &BufferConfig) -> Self {
        Self {
            phases: LineBuffer::new(buffers.phase_lines),
            thoughts: LineBuffer::new(buffers.thought_lines),
            tools: LineBuffer::new(buffers.tool_lines),
            outputs: LineBuffer::new(buffers.output_lines),
            conversation_pending_steps: HashMap::new(),
            conversation_last_ordinal: 0,
            conversation_lines: LineBuffer::new(buffers.conversation_lines),
            conversation_seen_event_ids: SeenEventIds::new(buffers.seen_event_ids),
            conversation_last_flush_ms: None,
            status: FlowStatus::Idle,
            message_id: None,
            last_rendered: String::new(),
        }
    }

    pub fn has_content(&self) -> bool {
        !(self.phases.is_empty()
            && self.thoughts.is_empty()
            && self.tools.is_empty()
            && self.outputs.is_empty()
            && self.conversation_lines.is_empty())
    }

    pub fn highest_pending_ordinal(&self) -> Option<u64> {
        self.conversation_pending_steps.keys().copied().max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl AnswerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct StreamingAnswerState {
    pub content: String,
    pub pending: String,
    pub status: AnswerStatus,
    pub message_id: Option<String>,
    pub last_flush_ms: Option<i64>,
}

impl Default for StreamingAnswerState {
    fn default() -> Self {
        Self {
            content: String::new(),
            pending: String::new(),
            status: AnswerStatus::Idle,
            message_id: None,
            last_flush_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionType {
    LowConfidence,
    Ambiguity,
    Timeout,
    AgentRequest,
    CircuitBreaker,
    ValidationRequired,
}

impl InterventionType {
    /// Unrecognized types fall back to an agent request.
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "low_confidence" => Self::LowConfidence,
            "ambiguity" => Self::Ambiguity,
            "timeout" => Self::Timeout,
            "circuit_breaker" => Self::CircuitBreaker,
            "validation_required" => Self::ValidationRequired,
            _ => Self::AgentRequest,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::LowConfidence => "置信度不足",
            Self::Ambiguity => "存在歧义",
            Self::Timeout => "分析超时",
            Self::AgentRequest => "需要确认",
            Self::CircuitBreaker => "熔断保护",
            Self::ValidationRequired => "需要验证",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Continue,
    Focus,
    Abort,
    Custom,
}

impl InterventionAction {
    /// Unrecognized actions fall back to `continue`.
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "focus" => Self::Focus,
            "abort" => Self::Abort,
            "custom" => Self::Custom,
            _ => Self::Continue,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Focus => "focus",
            Self::Abort => "abort",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionOption {
    pub id: String,
    pub label: String,
    pub action: InterventionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionContext {
    pub confidence: f64,
    pub elapsed_time_ms: u64,
    pub rounds_completed: u64,
    pub progress_summary: String,
    pub trigger_reason: String,
    pub findings_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionPoint {
    pub intervention_id: String,
    #[serde(rename = "type")]
    pub kind: InterventionType,
    pub options: Vec<InterventionOption>,
    pub context: InterventionContext,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveIntervention {
    pub point: InterventionPoint,
    pub message_id: String,
    pub requested_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterventionResolution {
    Resolved { action: String },
    TimedOut { default_action: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionOutcome {
    pub intervention_id: String,
    pub resolution: InterventionResolution,
    pub at_ms: i64,
}

/// `active` is `Some` exactly while the protocol is in its Active state.
#[derive(Debug, Clone, Default)]
pub struct InterventionState {
    pub active: Option<ActiveIntervention>,
    pub last_outcome: Option<InterventionOutcome>,
}

impl InterventionState {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedError {
    pub skill_id: String,
    pub step_id: Option<String>,
    pub error: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CollectedErrors {
    items: Vec<CollectedError>,
}

impl CollectedErrors {
    pub fn push(&mut self, error: CollectedError) {
        self.items.push(error);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectedError> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn drain(&mut self) -> Vec<CollectedError> {
        std::mem::take(&mut self.items)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Open,
    Completed,
    Failed,
}

impl SessionLifecycle {
    pub fn is_closed(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Everything the reducer owns for one analysis session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub config: ReducerConfig,
    pub flow: StreamingFlowState,
    pub answer: StreamingAnswerState,
    pub intervention: InterventionState,
    pub dedup: DedupCache,
    pub errors: CollectedErrors,
    pub lifecycle: SessionLifecycle,
    pub plan_message_id: Option<String>,
    next_message_seq: u64,
}

impl SessionState {
    pub fn new(config: ReducerConfig) -> Self {
        Self::with_session_id(SessionId::new_uuid(), config)
    }

    pub fn with_session_id(session_id: SessionId, config: ReducerConfig) -> Self {
        Self {
            session_id,
            flow: StreamingFlowState::new(&config.buffers),
            answer: StreamingAnswerState::default(),
            intervention: InterventionState::default(),
            dedup: DedupCache::default(),
            errors: CollectedErrors::default(),
            lifecycle: SessionLifecycle::Open,
            plan_message_id: None,
            next_message_seq: 1,
            config,
        }
    }

    /// Replaces every record wholesale; the config is kept.
    pub fn start_new_session(&mut self) -> &SessionId {
        *self = Self::new(self.config.clone());
        &self.session_id
    }

    pub fn next_message_id(&mut self) -> String {
        let seq = self.next_message_seq;
        self.next_message_seq = self.next_message_seq.saturating_add(1);
        let prefix: String = self.session_id.as_str().chars().take(8).collect();
        format!("{prefix}-{seq}")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn line_buffer_capacity_eviction_is_fifo() {
        let mut buffer = LineBuffer::new(3);
        for value in ["1", "2", "3", "4", "5"] {
            buffer.push(value);
        }
        assert_eq!(buffer.to_vec(), vec!["3", "4", "5"]);
        assert_eq!(buffer.last().map(String::as_str), Some("5"));
    }

    #[test]
    fn zero_capacity_buffers_still_hold_one_line() {
        let mut buffer = LineBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.to_vec(), vec!["b"]);
    }

    #[test]
    fn seen_ids_evict_oldest_and_forget_it() {
        let mut seen = SeenEventIds::new(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("a"));
        assert!(seen.insert("a"));
    }

    #[test]
    fn dedup_cache_admits_each_key_once() {
        let mut cache = DedupCache::default();
        assert!(cache.insert_if_new("skill:step"));
        assert!(!cache.insert_if_new("skill:step"));
        assert!(cache.contains("skill:step"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn collected_errors_drain_empties_the_list() {
        let mut errors = CollectedErrors::default();
        errors.push(CollectedError {
            skill_id: "s".into(),
            step_id: None,
            error: "e".into(),
            timestamp_ms: 1,
        });
        assert_eq!(errors.drain().len(), 1);
        assert!(errors.is_empty());
        assert!(errors.drain().is_empty());
    }

    #[test]
    fn phase_and_role_parse_with_defaults() {
        assert_eq!(StepPhase::parse("THINKING"), StepPhase::Thinking);
        assert_eq!(StepPhase::parse("weird"), StepPhase::Progress);
        assert_eq!(StepRole::parse("system"), StepRole::System);
        assert_eq!(StepRole::parse(""), StepRole::Agent);
    }

    #[test]
    fn message_ids_are_unique_and_prefixed() {
        let mut state = SessionState::with_session_id(
            SessionId::from_string("abcdef0123456789"),
            ReducerConfig::default(),
        );
        assert_eq!(state.next_message_id(), "abcdef01-1");
        assert_eq!(state.next_message_id(), "abcdef01-2");
    }

    #[test]
    fn new_session_replaces_all_records() {
        let mut state = SessionState::new(ReducerConfig::default());
        let first = state.session_id.clone();
        state.flow.status = FlowStatus::Completed;
        state.dedup.insert_if_new("k");
        state.lifecycle = SessionLifecycle::Completed;

        let second = state.start_new_session().clone();
        assert_ne!(first, second);
        assert_eq!(state.flow.status, FlowStatus::Idle);
        assert!(state.dedup.is_empty());
        assert_eq!(state.lifecycle, SessionLifecycle::Open);
    }
}
