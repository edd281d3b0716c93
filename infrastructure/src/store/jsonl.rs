//! JSONL audit log for finalized message records.
//!
//! Each record is serialized as a single JSON line with a `type` field and
//! an RFC 3339 timestamp, appended via a buffered writer. Append-only, so
//! a crash loses at most the unflushed tail.

use council_domain::MessageRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Append-only JSONL writer for message records.
///
/// Thread-safe via `Mutex<BufWriter<File>>`. Flushes after every record.
pub struct JsonlMessageLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlMessageLog {
    /// Open (or create) the log at the given path.
    ///
    /// Creates parent directories if they don't exist. Returns `None` if
    /// the file cannot be opened; the caller then runs without an audit
    /// log rather than failing.
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(
                    "Could not create message log directory {}: {}",
                    parent.display(),
                    e
                );
                return None;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not open message log file {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Failures are logged and swallowed; the audit
    /// log never fails a session.
    pub fn append(&self, record: &MessageRecord) {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let mut value = match serde_json::to_value(record) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return,
        };
        value.insert(
            "type".to_string(),
            serde_json::Value::String("message_record".to_string()),
        );
        value.insert(
            "timestamp".to_string(),
            serde_json::Value::String(timestamp),
        );

        let Ok(line) = serde_json::to_string(&serde_json::Value::Object(value)) else {
            return;
        };

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlMessageLog {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_domain::{
        ConversationId, MessageId, SessionId, SessionOutcome, Usage,
    };

    fn record() -> MessageRecord {
        MessageRecord {
            message_id: MessageId::new("m1"),
            session_id: SessionId::new("s1"),
            conversation_id: ConversationId::new("c1"),
            question: "Should we launch in Q2?".into(),
            drafts: vec![],
            rankers: vec![],
            aggregate_ranking: vec![],
            synthesis: None,
            usage: Usage::new(10, 5, 1),
            outcome: SessionOutcome::Complete,
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        let log = JsonlMessageLog::open(&path).unwrap();

        log.append(&record());
        log.append(&record());
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["type"], "message_record");
        assert_eq!(parsed["question"], "Should we launch in Q2?");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn reopening_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");

        JsonlMessageLog::open(&path).unwrap().append(&record());
        JsonlMessageLog::open(&path).unwrap().append(&record());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
