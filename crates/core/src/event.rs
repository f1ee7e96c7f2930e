//! Generation events — the totally ordered stream a model backend emits
//! for one generation session.
//!
//! A session produces zero or more delta events and terminates on exactly
//! one of `Finish` or `Error`. The serialized tag names double as the wire
//! frame names on the client-facing stream: `text-delta`, `reasoning-delta`,
//! `source`, `finish`, `error`.

use serde::{Deserialize, Serialize};

/// Token accounting reported by the backend at completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cached_input_tokens: u32,
    #[serde(default)]
    pub reasoning_tokens: u32,
}

/// One event in a generation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GenerationEvent {
    /// Partial answer text.
    TextDelta { text: String },

    /// Partial reasoning text (separate channel).
    ReasoningDelta { text: String },

    /// A citation reference surfaced by the backend.
    Source {
        id: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    /// Terminal success: the fully reconstructed output plus accounting.
    Finish {
        text: String,
        reasoning: String,
        model_id: String,
        usage: Option<TokenUsage>,
    },

    /// Terminal failure after zero or more deltas.
    Error { message: String },
}

impl GenerationEvent {
    /// Wire frame name for this event.
    pub fn frame_name(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::Source { .. } => "source",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}
