use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Session event log, one compact JSON object per line.
///
/// Every line carries `type`, `session_id` and `ts`; fields from the caller
/// are merged afterwards and win on conflicts. The file is opened on the
/// first event and kept open for the rest of the session. A writer built
/// with [`EventWriter::disabled`] composes events without any file.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    session_id: String,
    target: Option<PathBuf>,
    file: Mutex<Option<File>>,
    written: AtomicU64,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self::with_target(Some(path.into()), session_id.into())
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::with_target(None, session_id.into())
    }

    fn with_target(target: Option<PathBuf>, session_id: String) -> Self {
        Self {
            log: Arc::new(SessionLog {
                session_id,
                target,
                file: Mutex::new(None),
                written: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.log.target.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.log.session_id
    }

    /// Lines appended to the file so far.
    pub fn written(&self) -> u64 {
        self.log.written.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event_type: &str, fields: EventPayload) -> anyhow::Result<Value> {
        let event = compose_event(event_type, &self.log.session_id, fields);
        let Some(target) = self.log.target.as_deref() else {
            return Ok(event);
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        let mut slot = self
            .log
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(open_log(target)?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
            self.log.written.fetch_add(1, Ordering::Relaxed);
        }
        Ok(event)
    }
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Builds one event object: the standard header, then `fields`.
pub fn compose_event(event_type: &str, session_id: &str, fields: EventPayload) -> Value {
    let mut event = Map::with_capacity(fields.len() + 3);
    event.insert("type".into(), Value::from(event_type));
    event.insert("session_id".into(), Value::from(session_id));
    event.insert("ts".into(), Value::from(now_utc_iso()));
    event.extend(fields);
    Value::Object(event)
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Unwraps a `json!({...})` literal into an event payload.
pub fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn types_in(path: &Path) -> anyhow::Result<Vec<String>> {
        Ok(fs::read_to_string(path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect())
    }

    #[test]
    fn batch_event_lands_on_disk_with_header() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let emitted = writer.emit("batch_submitted", payload(json!({"pixels": 12})))?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["session_id"], json!("session-1"));
        assert_eq!(parsed["pixels"], json!(12));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        assert_eq!(writer.written(), 1);
        Ok(())
    }

    #[test]
    fn clones_share_one_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");
        let worker_side = writer.clone();

        writer.emit("bot_started", EventPayload::new())?;
        worker_side.emit("sync_completed", EventPayload::new())?;
        writer.emit("bot_stopped", payload(json!({"reason": "completed"})))?;

        assert_eq!(
            types_in(&path)?,
            vec!["bot_started", "sync_completed", "bot_stopped"]
        );
        assert_eq!(writer.written(), 3);
        Ok(())
    }

    #[test]
    fn fields_override_the_header() {
        let event = compose_event(
            "bot_reloaded",
            "session-1",
            payload(json!({"session_id": "replayed", "generation": 2})),
        );
        assert_eq!(event["type"], json!("bot_reloaded"));
        assert_eq!(event["session_id"], json!("replayed"));
        assert_eq!(event["generation"], json!(2));
    }

    #[test]
    fn disabled_writer_never_creates_a_file() -> anyhow::Result<()> {
        let writer = EventWriter::disabled("quiet");
        let emitted = writer.emit("tile_skipped", payload(json!({"tiles": 1})))?;
        assert!(writer.path().is_none());
        assert_eq!(emitted["type"], json!("tile_skipped"));
        assert_eq!(writer.written(), 0);
        Ok(())
    }
}
