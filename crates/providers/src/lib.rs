//! # chatrelay Providers
//!
//! Model backend implementations of [`TextGenerator`].
//!
//! [`DeepSeekGenerator`] speaks the OpenAI-compatible chat completions
//! API with DeepSeek's extensions (separate `reasoning_content` delta
//! channel, cache-hit token accounting).
//!
//! [`TextGenerator`]: chatrelay_core::TextGenerator

pub mod deepseek;

pub use deepseek::DeepSeekGenerator;
