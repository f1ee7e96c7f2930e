//! # chatrelay Core
//!
//! Domain types, traits, and error definitions for the chatrelay streaming
//! chat backend. This crate carries no HTTP or storage dependencies — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod generator;
pub mod message;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{BackendError, Error, Result, StoreError};
pub use event::{GenerationEvent, TokenUsage};
pub use generator::{GenerationRequest, ModelKind, PromptMessage, TextGenerator};
pub use message::{Conversation, ConversationId, Message, MessageMetadata, MessagePart, Role};
pub use store::{
    ConversationPage, ConversationStats, DailyUsage, HistoryStore, ModelUsage, NewMessage,
    TopConversation, UsageOverview, UsageRecord, UsageStore,
};
