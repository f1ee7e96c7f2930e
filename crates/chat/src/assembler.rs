//! Context assembly — turns stored history plus the incoming turn into
//! the prompt sent to the backend.

use std::sync::Arc;

use chatrelay_core::{
    ConversationId, Error, HistoryStore, MessageMetadata, MessagePart, NewMessage, PromptMessage,
    Result, Role,
};
use tracing::debug;

/// Builds the prompt for one generation turn.
///
/// For a normal turn the user message is stored *before* generation
/// starts, so it survives even if the backend fails. For a regenerate
/// turn the newest assistant message is deleted instead and the caller's
/// message is neither stored nor appended (it is already in history).
pub struct ContextAssembler {
    history: Arc<dyn HistoryStore>,
    /// Number of most-recent messages replayed into the prompt.
    window: usize,
}

impl ContextAssembler {
    pub fn new(history: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self { history, window }
    }

    /// Assemble the prompt for a turn in `conversation_id`.
    ///
    /// `new_message` is the caller's text; ignored when `regenerate` is set.
    pub async fn assemble(
        &self,
        conversation_id: &ConversationId,
        regenerate: bool,
        new_message: &str,
    ) -> Result<Vec<PromptMessage>> {
        if self
            .history
            .resolve_conversation(conversation_id)
            .await?
            .is_none()
        {
            return Err(Error::InvalidConversation(conversation_id.to_string()));
        }

        if regenerate {
            // Idempotent: a second regenerate on the same turn deletes nothing
            let deleted = self
                .history
                .delete_last_message(conversation_id, Role::Assistant)
                .await?;
            debug!(
                conversation = %conversation_id,
                deleted = deleted.is_some(),
                "Regenerate: dropped newest assistant message"
            );
        } else {
            self.history
                .create_message(NewMessage {
                    conversation_id: conversation_id.clone(),
                    role: Role::User,
                    parts: vec![MessagePart::text(new_message)],
                    metadata: MessageMetadata::default(),
                })
                .await?;
        }

        let messages = self.history.list_messages(conversation_id).await?;
        let skip = messages.len().saturating_sub(self.window);

        let prompt: Vec<PromptMessage> = messages
            .into_iter()
            .skip(skip)
            .filter_map(|m| {
                // Reasoning parts are never replayed; a reasoning-only
                // message contributes nothing
                let content = m.prompt_text();
                if content.is_empty() {
                    None
                } else {
                    Some(PromptMessage::new(m.role, content))
                }
            })
            .collect();

        debug!(
            conversation = %conversation_id,
            turns = prompt.len(),
            regenerate,
            "Assembled prompt context"
        );
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::HistoryStore;
    use chatrelay_store::MemoryStore;

    async fn seeded_store() -> (Arc<MemoryStore>, ConversationId) {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        (store, conv.id)
    }

    #[tokio::test]
    async fn unknown_conversation_rejected() {
        let store = Arc::new(MemoryStore::new());
        let assembler = ContextAssembler::new(store, 40);
        let result = assembler
            .assemble(&ConversationId::from("missing"), false, "hi")
            .await;
        assert!(matches!(result, Err(Error::InvalidConversation(_))));
    }

    #[tokio::test]
    async fn user_message_stored_before_generation() {
        let (store, conv) = seeded_store().await;
        let assembler = ContextAssembler::new(store.clone(), 40);

        let prompt = assembler.assemble(&conv, false, "What is 2+2?").await.unwrap();

        // Durable before any generation event
        let stored = store.list_messages(&conv).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);

        assert_eq!(prompt.len(), 1);
        assert_eq!(prompt[0].content, "What is 2+2?");
    }

    #[tokio::test]
    async fn regenerate_drops_assistant_and_skips_store() {
        let (store, conv) = seeded_store().await;
        store
            .create_message(NewMessage {
                conversation_id: conv.clone(),
                role: Role::User,
                parts: vec![MessagePart::text("question")],
                metadata: MessageMetadata::default(),
            })
            .await
            .unwrap();
        store
            .create_message(NewMessage {
                conversation_id: conv.clone(),
                role: Role::Assistant,
                parts: vec![MessagePart::text("bad answer")],
                metadata: MessageMetadata::default(),
            })
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store.clone(), 40);
        let prompt = assembler.assemble(&conv, true, "ignored").await.unwrap();

        // Only the original user turn remains, and nothing new was stored
        let stored = store.list_messages(&conv).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);

        assert_eq!(prompt.len(), 1);
        assert_eq!(prompt[0].content, "question");
    }

    #[tokio::test]
    async fn regenerate_with_no_assistant_is_noop() {
        let (store, conv) = seeded_store().await;
        store
            .create_message(NewMessage {
                conversation_id: conv.clone(),
                role: Role::User,
                parts: vec![MessagePart::text("question")],
                metadata: MessageMetadata::default(),
            })
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store.clone(), 40);
        let prompt = assembler.assemble(&conv, true, "").await.unwrap();
        assert_eq!(prompt.len(), 1);
        assert_eq!(store.list_messages(&conv).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reasoning_parts_not_replayed() {
        let (store, conv) = seeded_store().await;
        store
            .create_message(NewMessage {
                conversation_id: conv.clone(),
                role: Role::User,
                parts: vec![MessagePart::text("q")],
                metadata: MessageMetadata::default(),
            })
            .await
            .unwrap();
        store
            .create_message(NewMessage {
                conversation_id: conv.clone(),
                role: Role::Assistant,
                parts: vec![
                    MessagePart::reasoning("private chain of thought"),
                    MessagePart::text("the answer"),
                ],
                metadata: MessageMetadata::default(),
            })
            .await
            .unwrap();

        let assembler = ContextAssembler::new(store, 40);
        let prompt = assembler.assemble(&conv, false, "next").await.unwrap();

        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt[1].content, "the answer");
        assert!(!prompt.iter().any(|p| p.content.contains("chain of thought")));
    }

    #[tokio::test]
    async fn history_window_truncates_oldest() {
        let (store, conv) = seeded_store().await;
        let assembler = ContextAssembler::new(store.clone(), 3);

        for i in 0..5 {
            assembler
                .assemble(&conv, false, &format!("turn {i}"))
                .await
                .unwrap();
        }

        let prompt = assembler.assemble(&conv, false, "latest").await.unwrap();
        assert_eq!(prompt.len(), 3);
        assert_eq!(prompt.last().unwrap().content, "latest");
        assert_eq!(prompt[0].content, "turn 4");
    }
}
