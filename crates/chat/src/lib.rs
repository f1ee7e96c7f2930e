//! # chatrelay Chat
//!
//! The streaming generation pipeline. One request flows through:
//!
//! ```text
//! ContextAssembler → GenerationBroker → StreamFanout ─┬→ client sink (SSE)
//!                                                     └→ MessageAssembly
//!                                                          → PersistenceCoordinator
//! ```
//!
//! The fanout owns the backend stream: the client receiving frames is an
//! observer, not a participant. Dropping the client never cancels the
//! session; assembly and persistence run to completion regardless.

pub mod assembler;
pub mod assembly;
pub mod broker;
pub mod coordinator;
pub mod fanout;
pub mod pipeline;

pub use assembler::ContextAssembler;
pub use assembly::MessageAssembly;
pub use broker::{GenerationBroker, ModelRouting};
pub use coordinator::PersistenceCoordinator;
pub use fanout::{FinishedGeneration, StreamFanout};
pub use pipeline::{ChatPipeline, GenerationSession, LiveGeneration};

#[cfg(test)]
pub(crate) mod testing;
