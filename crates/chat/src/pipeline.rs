//! The chat pipeline — one entry point per generation turn.

use std::sync::Arc;

use chatrelay_core::{ConversationId, GenerationEvent, ModelKind, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::assembler::ContextAssembler;
use crate::broker::GenerationBroker;
use crate::coordinator::PersistenceCoordinator;
use crate::fanout::StreamFanout;

/// Per-request state for one generation turn.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub conversation_id: ConversationId,
    /// `None` for anonymous callers (usage record skipped).
    pub user_id: Option<String>,
    pub kind: ModelKind,
    pub regenerate: bool,
}

/// A running generation turn.
///
/// `events` feeds the client; dropping it detaches the client without
/// cancelling anything. `completion` resolves once assembly and
/// persistence for the turn are done.
pub struct LiveGeneration {
    pub events: mpsc::Receiver<GenerationEvent>,
    pub completion: JoinHandle<()>,
}

/// Wires assembler, broker, fanout, and coordinator into one turn flow.
pub struct ChatPipeline {
    assembler: ContextAssembler,
    broker: GenerationBroker,
    coordinator: Arc<PersistenceCoordinator>,
    client_buffer: usize,
}

impl ChatPipeline {
    pub fn new(
        assembler: ContextAssembler,
        broker: GenerationBroker,
        coordinator: Arc<PersistenceCoordinator>,
        client_buffer: usize,
    ) -> Self {
        Self {
            assembler,
            broker,
            coordinator,
            client_buffer: client_buffer.max(1),
        }
    }

    /// Run one generation turn.
    ///
    /// Errors returned here (unknown conversation, unconfigured backend)
    /// happen before any streaming and map to plain HTTP errors. Once the
    /// stream is open, failures travel as `error` frames instead.
    pub async fn generate(
        &self,
        session: GenerationSession,
        new_message: String,
    ) -> Result<LiveGeneration> {
        let prompt = self
            .assembler
            .assemble(&session.conversation_id, session.regenerate, &new_message)
            .await?;

        let backend_events = self.broker.open_session(session.kind, prompt).await?;
        let model = self.broker.model_for(session.kind).to_string();

        let (client_tx, client_rx) = mpsc::channel(self.client_buffer);
        let coordinator = self.coordinator.clone();

        let completion = tokio::spawn(async move {
            let finished = StreamFanout::run(backend_events, client_tx).await;
            if let Some(finished) = finished {
                coordinator
                    .commit(
                        &session.conversation_id,
                        session.user_id.as_deref(),
                        &model,
                        finished,
                    )
                    .await;
            }
            info!(
                conversation = %session.conversation_id,
                kind = %session.kind,
                "Generation turn complete"
            );
        });

        Ok(LiveGeneration {
            events: client_rx,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ModelRouting;
    use crate::testing::ScriptedGenerator;
    use chatrelay_core::{
        Error, GenerationEvent, HistoryStore, MessagePart, Role, TokenUsage,
    };
    use chatrelay_metering::{PricingTable, UsageMeter};
    use chatrelay_store::MemoryStore;

    fn text(s: &str) -> GenerationEvent {
        GenerationEvent::TextDelta { text: s.into() }
    }

    fn finish(text: &str, reasoning: &str, usage: Option<TokenUsage>) -> GenerationEvent {
        GenerationEvent::Finish {
            text: text.into(),
            reasoning: reasoning.into(),
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

    fn pipeline(store: Arc<MemoryStore>, script: Vec<GenerationEvent>) -> ChatPipeline {
        ChatPipeline::new(
            ContextAssembler::new(store.clone(), 40),
            GenerationBroker::new(
                Some(Arc::new(ScriptedGenerator::new(script))),
                ModelRouting::default(),
            ),
            Arc::new(PersistenceCoordinator::new(
                store.clone(),
                store,
                Arc::new(UsageMeter::new(PricingTable::with_defaults())),
            )),
            8,
        )
    }

    fn session(conversation_id: &ConversationId, regenerate: bool) -> GenerationSession {
        GenerationSession {
            conversation_id: conversation_id.clone(),
            user_id: Some("u1".into()),
            kind: ModelKind::Primary,
            regenerate,
        }
    }

    #[tokio::test]
    async fn full_turn_streams_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let pipeline = pipeline(
            store.clone(),
            vec![
                text("Hello"),
                text(" world"),
                finish("Hello world", "", Some(usage())),
            ],
        );

        let mut live = pipeline
            .generate(session(&conv.id, false), "greet me".into())
            .await
            .unwrap();

        let mut frames = Vec::new();
        while let Some(event) = live.events.recv().await {
            frames.push(event);
        }
        assert_eq!(frames.len(), 3);
        assert!(frames.last().unwrap().is_terminal());

        live.completion.await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].parts, vec![MessagePart::text("Hello world")]);

        let records = store.usage_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, messages[1].id);
        assert!((records[0].estimated_cost - 0.00182).abs() < 1e-12);
    }

    #[tokio::test]
    async fn disconnect_after_two_of_five_deltas_still_persists() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let pipeline = pipeline(
            store.clone(),
            vec![
                text("1"),
                text("2"),
                text("3"),
                text("4"),
                text("5"),
                finish("12345", "", Some(usage())),
            ],
        );

        let mut live = pipeline
            .generate(session(&conv.id, false), "count".into())
            .await
            .unwrap();

        let _ = live.events.recv().await.unwrap();
        let _ = live.events.recv().await.unwrap();
        drop(live.events);

        live.completion.await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].parts, vec![MessagePart::text("12345")]);
        assert_eq!(store.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn regenerate_leaves_one_user_one_fresh_assistant() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();

        // First turn
        let first = pipeline(
            store.clone(),
            vec![text("old answer"), finish("old answer", "", None)],
        );
        let live = first
            .generate(session(&conv.id, false), "question".into())
            .await
            .unwrap();
        drop(live.events);
        live.completion.await.unwrap();
        assert_eq!(store.message_count(), 2);

        // Regenerate the assistant turn
        let second = pipeline(
            store.clone(),
            vec![text("new answer"), finish("new answer", "", None)],
        );
        let live = second
            .generate(session(&conv.id, true), String::new())
            .await
            .unwrap();
        drop(live.events);
        live.completion.await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].prompt_text(), "question");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].prompt_text(), "new answer");
    }

    #[tokio::test]
    async fn empty_finish_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let pipeline = pipeline(store.clone(), vec![finish("", "", Some(usage()))]);

        let live = pipeline
            .generate(session(&conv.id, false), "say nothing".into())
            .await
            .unwrap();
        drop(live.events);
        live.completion.await.unwrap();

        // Only the stored user message; no assistant message, no usage
        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(store.usage_records().is_empty());
    }

    #[tokio::test]
    async fn error_event_discards_everything() {
        let store = Arc::new(MemoryStore::new());
        let conv = store.create_conversation("u1", None).await.unwrap();
        let pipeline = pipeline(
            store.clone(),
            vec![
                text("partial "),
                GenerationEvent::Error {
                    message: "rate limited".into(),
                },
            ],
        );

        let mut live = pipeline
            .generate(session(&conv.id, false), "q".into())
            .await
            .unwrap();

        let mut last = None;
        while let Some(event) = live.events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(GenerationEvent::Error { .. })));

        live.completion.await.unwrap();

        // The user message stays (stored before generation); no assistant
        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(store.usage_records().is_empty());
    }

    #[tokio::test]
    async fn unknown_conversation_fails_before_stream() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = pipeline(store, vec![]);
        let result = pipeline
            .generate(session(&ConversationId::from("ghost"), false), "q".into())
            .await;
        assert!(matches!(result, Err(Error::InvalidConversation(_))));
    }
}
