//! Analysis session history.
//!
//! The subagent persists its per-session conversation so follow-up feedback
//! turns can continue against the same image set. Storage is external in
//! production; the in-memory implementation backs tests and single-process
//! runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored history message.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Per-session persistence used by the subagent.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Register a new analysis session over a set of stored file paths.
    async fn create_session(&self, session_id: &str, file_paths: Vec<String>);

    /// File paths registered for a session (empty when unknown).
    async fn session_files(&self, session_id: &str) -> Vec<String>;

    /// Append one message to a session's transcript.
    async fn add_message(&self, session_id: &str, role: &str, content: &str);

    /// Full transcript of a session, oldest first.
    async fn list_messages(&self, session_id: &str) -> Vec<HistoryMessage>;

    /// Store the session's latest analysis object.
    async fn store_analysis(&self, session_id: &str, analysis: Value);

    /// The most recently stored analysis across all sessions.
    async fn latest_analysis(&self) -> Option<(String, Value)>;
}

#[derive(Default)]
struct SessionRecord {
    files: Vec<String>,
    messages: Vec<HistoryMessage>,
    analysis: Option<Value>,
}

/// In-memory history store.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    latest: Arc<RwLock<Option<String>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_session(&self, session_id: &str, file_paths: Vec<String>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                files: file_paths,
                ..SessionRecord::default()
            },
        );
    }

    async fn session_files(&self, session_id: &str) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    async fn add_message(&self, session_id: &str, role: &str, content: &str) {
        let mut sessions = self.sessions.write().await;
        let record = sessions.entry(session_id.to_string()).or_default();
        record.messages.push(HistoryMessage {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    async fn list_messages(&self, session_id: &str) -> Vec<HistoryMessage> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    async fn store_analysis(&self, session_id: &str, analysis: Value) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.entry(session_id.to_string()).or_default().analysis = Some(analysis);
        }
        *self.latest.write().await = Some(session_id.to_string());
    }

    async fn latest_analysis(&self) -> Option<(String, Value)> {
        let latest = self.latest.read().await.clone()?;
        let sessions = self.sessions.read().await;
        sessions
            .get(&latest)
            .and_then(|s| s.analysis.clone())
            .map(|analysis| (latest, analysis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn latest_analysis_tracks_most_recent_session() {
        let store = InMemoryHistoryStore::new();
        store.create_session("s1", vec!["uploads/a.png".into()]).await;
        store.store_analysis("s1", json!({"doubts": []})).await;
        store.create_session("s2", vec!["uploads/b.png".into()]).await;
        store.store_analysis("s2", json!({"doubts": ["?"]})).await;

        let (session_id, analysis) = store.latest_analysis().await.unwrap();
        assert_eq!(session_id, "s2");
        assert_eq!(analysis["doubts"][0], "?");
    }

    #[tokio::test]
    async fn transcripts_accumulate_in_order() {
        let store = InMemoryHistoryStore::new();
        store.add_message("s1", "user", "first").await;
        store.add_message("s1", "assistant", "second").await;
        let messages = store.list_messages("s1").await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].content, "second");
    }
}
