//! Token usage accounting.
//!
//! Every LLM call records one [`TokenUsageEntry`] to an append-only JSON
//! array on disk plus a rolling summary (lifetime totals and
//! current-process-session totals). Writes happen under a process-wide lock
//! and go through write-then-rename so a crash never leaves a truncated
//! file behind.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::sketchflow::client_wrapper::TokenUsage;

lazy_static! {
    /// Process-wide write lock shared by all [`TokenUsageLog`] instances.
    static ref WRITE_LOCK: Mutex<()> = Mutex::new(());
    /// Identifier of the current process session in the summary file.
    static ref SESSION_ID: String = uuid::Uuid::new_v4().simple().to_string();
    static ref SESSION_STARTED_AT: DateTime<Utc> = Utc::now();
}

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageEntry {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub model: String,
    pub caller: String,
    pub request_tag: String,
    /// Adapter entry point (`complete`, `complete_stream`,
    /// `complete_with_tools`).
    pub function: String,
    pub streaming: bool,
    pub tool_choice: String,
    pub tool_count: usize,
    pub tools: Vec<String>,
    pub message_count: usize,
    pub elapsed_ms: f64,
    pub usage: TokenUsage,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

impl TokenUsageEntry {
    /// Start an entry with the bookkeeping fields filled in.
    pub fn new(model: impl Into<String>, caller: impl Into<String>, request_tag: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            provider_message_id: None,
            model: model.into(),
            caller: caller.into(),
            request_tag: request_tag.into(),
            function: String::new(),
            streaming: true,
            tool_choice: String::new(),
            tool_count: 0,
            tools: Vec::new(),
            message_count: 0,
            elapsed_ms: 0.0,
            usage: TokenUsage::default(),
            timestamp: Utc::now(),
            session_id: SESSION_ID.clone(),
        }
    }
}

/// Append-only usage sink writing a log file and a rolling summary.
#[derive(Debug, Clone)]
pub struct TokenUsageLog {
    log_path: PathBuf,
    summary_path: PathBuf,
}

impl TokenUsageLog {
    pub fn new(log_path: impl Into<PathBuf>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            summary_path: summary_path.into(),
        }
    }

    /// Record one entry. Failures are logged and swallowed; usage
    /// accounting never fails a turn.
    pub fn record(&self, entry: &TokenUsageEntry) {
        let _guard = WRITE_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = self.append_entry(entry) {
            log::warn!("Failed to record token usage: {}", err);
        }
        if let Err(err) = self.update_summary(entry) {
            log::warn!("Failed to update token usage summary: {}", err);
        }
    }

    fn append_entry(&self, entry: &TokenUsageEntry) -> std::io::Result<()> {
        let mut entries = load_json_array(&self.log_path);
        entries.push(serde_json::to_value(entry).unwrap_or(Value::Null));
        write_json_atomic(&self.log_path, &Value::Array(entries))
    }

    fn update_summary(&self, entry: &TokenUsageEntry) -> std::io::Result<()> {
        let existing = load_json_object(&self.summary_path);
        let mut total = usage_map(existing.get("total"));
        let recent_matches = existing
            .get("recent_session_id")
            .and_then(Value::as_str)
            .map(|id| id == SESSION_ID.as_str())
            .unwrap_or(false);
        let mut recent = if recent_matches {
            usage_map(existing.get("recent_session"))
        } else {
            usage_map(None)
        };

        for (key, value) in [
            ("input_tokens", entry.usage.input_tokens),
            ("output_tokens", entry.usage.output_tokens),
            ("total_tokens", entry.usage.total_tokens),
            ("cache_creation_input_tokens", entry.usage.cache_creation_input_tokens),
            ("cache_read_input_tokens", entry.usage.cache_read_input_tokens),
        ] {
            bump(&mut total, key, value);
            bump(&mut recent, key, value);
        }

        let summary = json!({
            "total": total,
            "recent_session": recent,
            "recent_session_id": SESSION_ID.as_str(),
            "recent_session_started_at": *SESSION_STARTED_AT,
            "updated_at": entry.timestamp,
        });
        write_json_atomic(&self.summary_path, &summary)
    }
}

fn bump(map: &mut serde_json::Map<String, Value>, key: &str, value: u64) {
    let current = map.get(key).and_then(Value::as_u64).unwrap_or(0);
    map.insert(key.to_string(), json!(current + value));
}

fn usage_map(value: Option<&Value>) -> serde_json::Map<String, Value> {
    match value.and_then(Value::as_object) {
        Some(map) => map.clone(),
        None => {
            let mut map = serde_json::Map::new();
            for key in [
                "input_tokens",
                "output_tokens",
                "total_tokens",
                "cache_creation_input_tokens",
                "cache_read_input_tokens",
            ] {
                map.insert(key.to_string(), json!(0));
            }
            map
        }
    }
}

fn load_json_array(path: &Path) -> Vec<Value> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<Value>(raw.trim())
            .ok()
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

fn load_json_object(path: &Path) -> serde_json::Map<String, Value> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<Value>(raw.trim())
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        Err(_) => serde_json::Map::new(),
    }
}

fn write_json_atomic(path: &Path, payload: &Value) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(payload).unwrap_or_default())?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let log = TokenUsageLog::new(dir.path().join("usage.json"), dir.path().join("summary.json"));

        let mut entry = TokenUsageEntry::new("test-model", "orchestrator", "initial");
        entry.usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
            ..TokenUsage::default()
        };
        log.record(&entry);
        log.record(&entry);

        let entries = load_json_array(&dir.path().join("usage.json"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["caller"], "orchestrator");

        let summary = load_json_object(&dir.path().join("summary.json"));
        assert_eq!(summary["total"]["input_tokens"], 200);
        assert_eq!(summary["recent_session"]["total_tokens"], 240);
    }

    #[test]
    fn corrupt_log_file_is_replaced_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("usage.json");
        fs::write(&log_path, "not json").unwrap();
        let log = TokenUsageLog::new(&log_path, dir.path().join("summary.json"));
        log.record(&TokenUsageEntry::new("m", "c", "t"));
        assert_eq!(load_json_array(&log_path).len(), 1);
    }
}
