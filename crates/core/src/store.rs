//! Store traits — the durable-store capabilities the pipeline consumes.
//!
//! `HistoryStore` covers conversations and messages; `UsageStore` covers
//! per-message token/cost accounting. Both are implemented by the store
//! crate (SQLite and in-memory backends).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, Message, MessageMetadata, MessagePart, Role};

/// Input for a message write. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub metadata: MessageMetadata,
}

/// One usage record, 1:1 with an assistant message.
///
/// `estimated_cost` is computed once at write time by the usage meter and
/// never recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub conversation_id: ConversationId,
    pub message_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cached_input_tokens: u32,
    pub reasoning_tokens: u32,
    /// Currency, rounded to 6 fractional digits.
    pub estimated_cost: f64,
}

/// Aggregated usage for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageOverview {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    /// Tokens consumed since UTC midnight.
    pub today_tokens: u64,
    pub today_cost: f64,
}

/// One day's usage totals. `date` is the UTC day in `YYYY-MM-DD` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// Usage totals grouped by backend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// Usage totals for a single conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub message_count: u64,
    pub request_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

/// One entry in the heaviest-conversations ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopConversation {
    pub conversation_id: ConversationId,
    pub title: Option<String>,
    pub request_count: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

/// A page of conversations for list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub items: Vec<Conversation>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Read/write access to conversations and their messages.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Create a conversation owned by `user_id`, returning it.
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation, StoreError>;

    /// Resolve a conversation by id. `Ok(None)` when it does not exist.
    async fn resolve_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// List a user's conversations, newest first.
    async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ConversationPage, StoreError>;

    /// Delete a conversation and everything hanging off it.
    /// Returns false when the id did not exist.
    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError>;

    /// All messages of a conversation, ordered by creation time ascending.
    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Persist one message, returning the stored row.
    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Delete the most recent message of the given role in a conversation.
    /// Idempotent — `Ok(None)` when no such message exists.
    async fn delete_last_message(
        &self,
        id: &ConversationId,
        role: Role,
    ) -> Result<Option<Message>, StoreError>;
}

/// Write access to usage records plus the statistics aggregations.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Persist one usage record.
    async fn create_usage(&self, record: UsageRecord) -> Result<(), StoreError>;

    /// Aggregate a user's usage across all conversations.
    async fn overview(&self, user_id: &str) -> Result<UsageOverview, StoreError>;

    /// Per-day usage totals over the last `days` UTC days, oldest first.
    /// Days with no usage are omitted.
    async fn daily_usage(&self, user_id: &str, days: u32) -> Result<Vec<DailyUsage>, StoreError>;

    /// Usage totals grouped by model, heaviest first.
    async fn usage_by_model(&self, user_id: &str) -> Result<Vec<ModelUsage>, StoreError>;

    /// Message and usage totals for one conversation. All zeros when the
    /// conversation has no recorded usage.
    async fn conversation_stats(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationStats, StoreError>;

    /// The `limit` conversations with the highest token totals.
    async fn top_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TopConversation>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_record_serialization() {
        let record = UsageRecord {
            user_id: "u1".into(),
            conversation_id: ConversationId::from("c1"),
            message_id: "m1".into(),
            model: "deepseek-chat".into(),
            input_tokens: 1000,
            output_tokens: 500,
            total_tokens: 1500,
            cached_input_tokens: 200,
            reasoning_tokens: 0,
            estimated_cost: 0.00182,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: UsageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn overview_defaults_to_zero() {
        let overview = UsageOverview::default();
        assert_eq!(overview.total_requests, 0);
        assert_eq!(overview.estimated_cost, 0.0);
    }
}
