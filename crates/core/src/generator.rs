//! TextGenerator trait — the abstraction over model backends.
//!
//! A `TextGenerator` knows how to send a resolved prompt to a language
//! model and stream the response back as `GenerationEvent`s.
//!
//! Implementations: DeepSeek-compatible HTTP backends, scripted test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::event::GenerationEvent;
use crate::message::Role;

/// The closed set of model capabilities the gateway exposes.
///
/// Each variant routes to a configured backend model id; unknown model
/// strings are rejected at the HTTP boundary, not looked up dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// The standard chat model.
    Primary,
    /// The reasoning-heavy model (separate reasoning channel, higher rates).
    ExtendedReasoning,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::ExtendedReasoning => write!(f, "extended-reasoning"),
        }
    }
}

/// One role-tagged entry of the resolved prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single generation request sent to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The backend model id (e.g. "deepseek-chat").
    pub model: String,

    /// The ordered prompt.
    pub messages: Vec<PromptMessage>,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature (0.0 = deterministic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// The model-backend capability.
///
/// `generate` opens one session and returns a channel of events produced
/// as generation proceeds (not pre-buffered). The sequence is finite and
/// terminates in `Finish` or `Error`; it is not restartable — a new call
/// is required per turn. Dropping the receiver cancels the session.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// A human-readable name for this backend (e.g. "deepseek").
    fn name(&self) -> &str;

    /// Open a generation session and stream events.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<GenerationEvent>, BackendError>;
}
