//! Persistence coordination — commits the finished turn after the stream
//! is complete.

use std::sync::Arc;

use chatrelay_core::{
    ConversationId, HistoryStore, MessageMetadata, NewMessage, Role, UsageStore,
};
use chatrelay_metering::UsageMeter;
use tracing::{debug, warn};

use crate::fanout::FinishedGeneration;

/// Writes the assistant message and its usage record.
///
/// Persistence is best-effort by contract: the client already has the
/// streamed content, so failures here are logged and never surfaced.
/// The usage record references the stored message id, so the message
/// write always comes first and a failed message write skips usage.
pub struct PersistenceCoordinator {
    history: Arc<dyn HistoryStore>,
    usage: Arc<dyn UsageStore>,
    meter: Arc<UsageMeter>,
}

impl PersistenceCoordinator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        usage: Arc<dyn UsageStore>,
        meter: Arc<UsageMeter>,
    ) -> Self {
        Self {
            history,
            usage,
            meter,
        }
    }

    /// Commit one finished generation.
    ///
    /// `model` is the backend model id that was requested; `user_id` is
    /// `None` for anonymous sessions, which skip the usage record.
    pub async fn commit(
        &self,
        conversation_id: &ConversationId,
        user_id: Option<&str>,
        model: &str,
        finished: FinishedGeneration,
    ) {
        if finished.parts.is_empty() {
            debug!(conversation = %conversation_id, "Empty generation; nothing to persist");
            return;
        }

        let message = match self
            .history
            .create_message(NewMessage {
                conversation_id: conversation_id.clone(),
                role: Role::Assistant,
                parts: finished.parts,
                metadata: MessageMetadata {
                    model: Some(model.to_string()),
                    model_id: Some(finished.model_id.clone()),
                },
            })
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Failed to persist assistant message");
                return;
            }
        };

        let (Some(user_id), Some(token_usage)) = (user_id, finished.usage) else {
            debug!(message = %message.id, "No user or no usage report; skipping usage record");
            return;
        };

        let record = self
            .meter
            .record(user_id, conversation_id, &message.id, model, &token_usage);

        if let Err(e) = self.usage.create_usage(record).await {
            warn!(message = %message.id, error = %e, "Failed to persist usage record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::{MessagePart, TokenUsage};
    use chatrelay_metering::PricingTable;
    use chatrelay_store::MemoryStore;

    fn coordinator(store: Arc<MemoryStore>) -> PersistenceCoordinator {
        PersistenceCoordinator::new(
            store.clone(),
            store,
            Arc::new(UsageMeter::new(PricingTable::with_defaults())),
        )
    }

    fn finished(parts: Vec<MessagePart>, usage: Option<TokenUsage>) -> FinishedGeneration {
        FinishedGeneration {
            parts,
            model_id: "deepseek-chat".into(),
            usage,
        }
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
            total_tokens: 1500,
            cached_input_tokens: 200,
            reasoning_tokens: 0,
        }
    }

    #[tokio::test]
    async fn commits_message_then_usage() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let coordinator = coordinator(store.clone());

        coordinator
            .commit(
                &conv.id,
                Some("u1"),
                "deepseek-chat",
                finished(vec![MessagePart::text("answer")], Some(usage())),
            )
            .await;

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].metadata.model.as_deref(), Some("deepseek-chat"));

        let records = store.usage_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, messages[0].id);
        assert!((records[0].estimated_cost - 0.00182).abs() < 1e-12);
    }

    #[tokio::test]
    async fn empty_parts_persist_nothing() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let coordinator = coordinator(store.clone());

        coordinator
            .commit(&conv.id, Some("u1"), "deepseek-chat", finished(vec![], Some(usage())))
            .await;

        assert_eq!(store.message_count(), 0);
        assert!(store.usage_records().is_empty());
    }

    #[tokio::test]
    async fn anonymous_session_skips_usage_record() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let coordinator = coordinator(store.clone());

        coordinator
            .commit(
                &conv.id,
                None,
                "deepseek-chat",
                finished(vec![MessagePart::text("answer")], Some(usage())),
            )
            .await;

        assert_eq!(store.message_count(), 1);
        assert!(store.usage_records().is_empty());
    }

    #[tokio::test]
    async fn missing_usage_report_still_stores_message() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let coordinator = coordinator(store.clone());

        coordinator
            .commit(
                &conv.id,
                Some("u1"),
                "deepseek-chat",
                finished(vec![MessagePart::text("answer")], None),
            )
            .await;

        assert_eq!(store.message_count(), 1);
        assert!(store.usage_records().is_empty());
    }
}
