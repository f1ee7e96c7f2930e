//! # chatrelay Store
//!
//! Durable storage backends implementing [`HistoryStore`] and
//! [`UsageStore`] from core.
//!
//! - [`SqliteStore`] — the production SQLite backend (WAL mode)
//! - [`MemoryStore`] — an in-process store for tests
//!
//! [`HistoryStore`]: chatrelay_core::HistoryStore
//! [`UsageStore`]: chatrelay_core::UsageStore

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
