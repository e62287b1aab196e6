use crate::errors::CrawltapeError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = "capture.jsonl";

/// Append-only JSONL journal of capture decisions.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
        }
    }

    /// Journal living in the fixture base directory.
    pub fn in_base_dir(base: &Path) -> Self {
        Self::new(base.join(JOURNAL_FILE))
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), CrawltapeError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CrawltapeError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| CrawltapeError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CrawltapeError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| CrawltapeError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| CrawltapeError::Io(e.to_string()))
    }

    /// Append, downgrading a write failure to a tracing warning. The journal
    /// never decides whether a capture succeeds.
    pub fn note(&self, level: &str, event_type: &str, payload: Value) {
        let event = LogEvent {
            level,
            event_type,
            payload,
        };
        if let Err(error) = self.append(&event) {
            tracing::warn!(path = %self.path.display(), %error, "capture journal write failed");
        }
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{JsonlLogger, LogEvent};
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("capture.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "fixture_written",
                payload: json!({"url": "https://shop.test/a/very/long/listing/page"}),
            })
            .expect("append");
        logger.note("warn", "fixture_discarded", json!({"slot": null}));

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event_type\":\"fixture_written\""));
        assert!(lines[0].contains("..."));
        assert!(lines[1].contains("fixture_discarded"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = super::truncate_json(json!("ééééééééééé"), 8);
        let text = value.as_str().expect("string");
        assert!(text.ends_with("..."));
    }
}
