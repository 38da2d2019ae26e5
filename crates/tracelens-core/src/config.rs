use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::StepPhase;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReducerConfig {
    pub buffers: BufferConfig,
    pub pacing: PacingConfig,
    pub answer: AnswerConfig,
    pub contract: ContractConfig,
    pub intervention: InterventionConfig,
}

impl ReducerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Capacities of the bounded buffers held by the flow state.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    pub phase_lines: usize,
    pub thought_lines: usize,
    pub tool_lines: usize,
    pub output_lines: usize,
    pub conversation_lines: usize,
    pub seen_event_ids: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            phase_lines: 8,
            thought_lines: 6,
            tool_lines: 8,
            output_lines: 8,
            conversation_lines: 200,
            seen_event_ids: 512,
        }
    }
}

/// Minimum gap, in milliseconds, between two paced conversation flushes.
/// The gap is chosen by the phase of the step about to be revealed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacingConfig {
    pub thinking: i64,
    pub tool: i64,
    pub result: i64,
    pub progress: i64,
    pub error: i64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            thinking: 220,
            tool: 160,
            result: 120,
            progress: 120,
            error: 0,
        }
    }
}

impl PacingConfig {
    pub fn gap_ms(&self, phase: StepPhase) -> i64 {
        match phase {
            StepPhase::Thinking => self.thinking,
            StepPhase::Tool => self.tool,
            StepPhase::Result => self.result,
            StepPhase::Progress => self.progress,
            StepPhase::Error => self.error,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnswerConfig {
    pub flush_chars: usize,
    pub flush_interval_ms: i64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            flush_chars: 24,
            flush_interval_ms: 16,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ContractConfig {
    pub max_conclusions: usize,
    pub max_frame_refs: usize,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            max_conclusions: 3,
            max_frame_refs: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InterventionConfig {
    pub default_timeout_ms: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ReducerConfig::from_toml_str("").expect("parse");
        assert_eq!(config, ReducerConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = ReducerConfig::from_toml_str(
            r#"
            [pacing]
            thinking = 500

            [answer]
            flush_chars = 8
            "#,
        )
        .expect("parse");
        assert_eq!(config.pacing.thinking, 500);
        assert_eq!(config.pacing.tool, 160);
        assert_eq!(config.answer.flush_chars, 8);
        assert_eq!(config.answer.flush_interval_ms, 16);
        assert_eq!(config.buffers, BufferConfig::default());
    }

    #[test]
    fn malformed_document_is_reported() {
        let err = ReducerConfig::from_toml_str("[pacing\nthinking = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[buffers]\nconversation_lines = 3\n").expect("write");
        let config = ReducerConfig::load(&path).expect("load");
        assert_eq!(config.buffers.conversation_lines, 3);

        let missing = ReducerConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }

    #[test]
    fn error_phase_is_never_paced_by_default() {
        assert_eq!(PacingConfig::default().gap_ms(StepPhase::Error), 0);
        assert_eq!(PacingConfig::default().gap_ms(StepPhase::Thinking), 220);
    }
}
