//! Conversation state and orchestrator wiring.
//!
//! A [`Conversation`] owns exactly one [`Orchestrator`]; the
//! [`ConversationStore`] hands back the same orchestrator instance for the
//! same conversation id on every call, and two distinct ids never share
//! history, workflow state, or analysis sessions.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::sketchflow::orchestrator::Orchestrator;

/// Factory producing a fresh orchestrator per conversation.
pub type OrchestratorFactory = Box<dyn Fn() -> Orchestrator + Send + Sync>;

/// One conversation and its orchestrator.
#[derive(Clone)]
pub struct Conversation {
    pub id: String,
    pub orchestrator: Arc<Mutex<Orchestrator>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-process registry of conversations.
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    factory: OrchestratorFactory,
}

impl ConversationStore {
    pub fn new(factory: OrchestratorFactory) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Fetch an existing conversation or allocate a fresh one.
    ///
    /// A known id returns the same [`Orchestrator`] object on every call.
    /// An absent or unknown id allocates `conv_<32 hex>` (or adopts the
    /// requested id) with a brand-new orchestrator.
    pub async fn get_or_create(&self, conversation_id: Option<&str>) -> Conversation {
        if let Some(id) = conversation_id {
            let mut conversations = self.conversations.write().await;
            if let Some(convo) = conversations.get_mut(id) {
                convo.updated_at = Utc::now();
                return convo.clone();
            }
        }
        let new_id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("conv_{}", uuid::Uuid::new_v4().simple()));
        let now = Utc::now();
        let convo = Conversation {
            id: new_id.clone(),
            orchestrator: Arc::new(Mutex::new((self.factory)())),
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .write()
            .await
            .insert(new_id, convo.clone());
        convo
    }

    /// Look up a conversation; unknown ids return `None`.
    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketchflow::client_wrapper::{
        BoxError, CallOptions, ChatMessage, ClientWrapper, Completion, DeltaCallback, ToolChoice,
        ToolCompletion, ToolDefinition,
    };
    use crate::sketchflow::tool_protocol::ToolRegistry;
    use async_trait::async_trait;

    struct NullClient;

    #[async_trait]
    impl ClientWrapper for NullClient {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _opts: &CallOptions,
        ) -> Result<Completion, BoxError> {
            Ok(Completion::default())
        }

        async fn complete_stream(
            &self,
            _messages: &[ChatMessage],
            _opts: &CallOptions,
            _on_delta: DeltaCallback,
        ) -> Result<Completion, BoxError> {
            Ok(Completion::default())
        }

        async fn complete_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
            _tool_choice: Option<ToolChoice>,
            _opts: &CallOptions,
            _on_delta: Option<DeltaCallback>,
        ) -> Result<ToolCompletion, BoxError> {
            Ok(ToolCompletion::default())
        }

        fn model_name(&self) -> &str {
            "null"
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Box::new(|| {
            Orchestrator::new(Arc::new(NullClient), Arc::new(ToolRegistry::new()))
        }))
    }

    #[tokio::test]
    async fn same_id_returns_same_orchestrator() {
        let store = store();
        let first = store.get_or_create(None).await;
        assert!(first.id.starts_with("conv_"));
        let second = store.get_or_create(Some(&first.id)).await;
        assert!(Arc::ptr_eq(&first.orchestrator, &second.orchestrator));
    }

    #[tokio::test]
    async fn distinct_ids_get_distinct_orchestrators() {
        let store = store();
        let a = store.get_or_create(None).await;
        let b = store.get_or_create(None).await;
        assert_ne!(a.id, b.id);
        assert!(!Arc::ptr_eq(&a.orchestrator, &b.orchestrator));
    }

    #[tokio::test]
    async fn unknown_id_returns_none() {
        let store = store();
        assert!(store.get("conv_missing").await.is_none());
    }
}
