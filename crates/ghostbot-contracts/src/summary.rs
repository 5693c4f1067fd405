use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

/// End-of-session record written next to the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub exit_reason: String,
    pub iterations: u64,
    pub batches_submitted: u64,
    pub pixels_submitted: u64,
    pub target_pixels: u64,
    pub outstanding_pixels: u64,
}

pub fn write_summary(
    path: &Path,
    summary: &SessionSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, SessionSummary};

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("summary.json");

        let summary = SessionSummary {
            session_id: "session-9".to_string(),
            started_at: "2026-10-19T00:00:00+00:00".to_string(),
            finished_at: "2026-10-19T00:10:00+00:00".to_string(),
            exit_reason: "completed".to_string(),
            iterations: 3,
            batches_submitted: 2,
            pixels_submitted: 40,
            target_pixels: 40,
            outstanding_pixels: 0,
        };
        let mut extra = Map::new();
        extra.insert("image".to_string(), json!("ghost.png"));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["session_id"], json!("session-9"));
        assert_eq!(parsed["exit_reason"], json!("completed"));
        assert_eq!(parsed["pixels_submitted"], json!(40));
        assert_eq!(parsed["image"], json!("ghost.png"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
