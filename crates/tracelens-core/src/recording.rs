use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::RecordingError;
use crate::event::StreamEvent;
use crate::fields;

/// Loads a recording. Each record must carry a `type`; its timestamp comes
/// from `receivedAtMs` or `ts` when present, else `index * step_ms`.
pub fn load_recording(path: impl AsRef<Path>, step_ms: i64) -> Result<Vec<StreamEvent>, RecordingError> {
    let file = File::open(path.as_ref())?;
    parse_recording(BufReader::new(file), step_ms)
}

pub fn parse_recording(reader: impl BufRead, step_ms: i64) -> Result<Vec<StreamEvent>, RecordingError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(&line).map_err(|source| RecordingError::Json {
            line: line_no,
            source,
        })?;
        let Some(event_type) = fields::read_opt_string(&record, "type") else {
            return Err(RecordingError::MissingType { line: line_no });
        };
        let synthetic = (events.len() as i64).saturating_mul(step_ms);
        let received_at_ms = fields::read_number(&record, "receivedAtMs")
            .or_else(|| fields::read_number(&record, "ts"))
            .map(|ms| ms as i64)
            .unwrap_or(synthetic);
        events.push(StreamEvent::new(event_type, record, received_at_ms));
    }
    debug!(events = events.len(), "recording parsed");
    Ok(events)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn loads_events_with_synthetic_and_recorded_clocks() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, r#"{{"type":"progress","data":{{"phase":"init"}}}}"#).expect("write");
        writeln!(file).expect("write");
        writeln!(file, r#"{{"type":"end","receivedAtMs":9000}}"#).expect("write");
        writeln!(file, r#"{{"type":"end"}}"#).expect("write");

        let events = load_recording(file.path(), 100).expect("load");
        let clocks: Vec<(String, i64)> = events
            .iter()
            .map(|e| (e.event_type.clone(), e.received_at_ms))
            .collect();
        assert_eq!(
            clocks,
            vec![
                ("progress".to_string(), 0),
                ("end".to_string(), 9000),
                ("end".to_string(), 200),
            ]
        );
    }

    #[test]
    fn missing_type_reports_line_number() {
        let input = "{\"type\":\"end\"}\n{\"data\":{}}\n";
        let err = parse_recording(input.as_bytes(), 10).expect_err("should fail");
        assert!(matches!(err, RecordingError::MissingType { line: 2 }));
    }

    #[test]
    fn invalid_json_reports_line_number() {
        let err = parse_recording("not json".as_bytes(), 10).expect_err("should fail");
        assert!(matches!(err, RecordingError::Json { line: 1, .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_recording(dir.path().join("absent.jsonl"), 10).expect_err("should fail");
        assert!(matches!(err, RecordingError::Io(_)));
    }
}
