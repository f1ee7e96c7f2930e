//! Generation broker — opens one backend session per turn.

use std::sync::Arc;

use chatrelay_core::{
    BackendError, Error, GenerationEvent, GenerationRequest, ModelKind, PromptMessage, Result,
    TextGenerator,
};
use tokio::sync::mpsc;
use tracing::debug;

/// Maps each [`ModelKind`] to a configured backend model id.
#[derive(Debug, Clone)]
pub struct ModelRouting {
    pub primary: String,
    pub extended_reasoning: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelRouting {
    pub fn model_for(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Primary => &self.primary,
            ModelKind::ExtendedReasoning => &self.extended_reasoning,
        }
    }
}

impl Default for ModelRouting {
    fn default() -> Self {
        Self {
            primary: "deepseek-chat".into(),
            extended_reasoning: "deepseek-reasoner".into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Opens generation sessions against an injected backend.
///
/// The backend is `None` when no credential was configured; in that case
/// `open_session` fails synchronously, before any event is produced.
pub struct GenerationBroker {
    generator: Option<Arc<dyn TextGenerator>>,
    routing: ModelRouting,
}

impl GenerationBroker {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, routing: ModelRouting) -> Self {
        Self { generator, routing }
    }

    /// The backend model id a kind routes to.
    pub fn model_for(&self, kind: ModelKind) -> &str {
        self.routing.model_for(kind)
    }

    /// Open one session. The returned receiver yields events in order and
    /// terminates with exactly one `Finish` or `Error`.
    pub async fn open_session(
        &self,
        kind: ModelKind,
        prompt: Vec<PromptMessage>,
    ) -> Result<mpsc::Receiver<GenerationEvent>> {
        let Some(generator) = &self.generator else {
            return Err(Error::Backend(BackendError::NotConfigured(
                "no backend API key configured".into(),
            )));
        };

        let model = self.routing.model_for(kind).to_string();
        debug!(backend = generator.name(), %kind, %model, "Opening generation session");

        let receiver = generator
            .generate(GenerationRequest {
                model,
                messages: prompt,
                max_tokens: Some(self.routing.max_tokens),
                temperature: Some(self.routing.temperature),
            })
            .await?;

        Ok(receiver)
    }
}
