//! In-process store for tests.
//!
//! Backs both store traits with plain vectors behind a mutex. Inserts
//! carry a monotonically increasing sequence number so ordering matches
//! the SQLite backend even when timestamps collide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use uuid::Uuid;

use chatrelay_core::{
    Conversation, ConversationId, ConversationPage, ConversationStats, DailyUsage, HistoryStore,
    Message, ModelUsage, NewMessage, Role, StoreError, TopConversation, UsageOverview, UsageRecord,
    UsageStore,
};

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    messages: Vec<(u64, Message)>,
    usage: Vec<(DateTime<Utc>, UsageRecord)>,
    next_seq: u64,
}

/// An in-memory store. Cloning is not supported; share it via `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages across all conversations.
    pub fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    /// All usage records written so far.
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.inner
            .lock()
            .unwrap()
            .usage
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Backdate one usage record. Test helper for day-based aggregations.
    pub fn backdate_usage(&self, message_id: &str, created_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        for (at, record) in inner.usage.iter_mut() {
            if record.message_id == message_id {
                *at = created_at;
            }
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(user_id, title);
        let mut inner = self.inner.lock().unwrap();
        inner.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn resolve_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.conversations.iter().find(|c| &c.id == id).cloned())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<ConversationPage, StoreError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let inner = self.inner.lock().unwrap();

        let mut mine: Vec<Conversation> = inner
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = mine.len() as u64;
        let start = ((page - 1) * page_size) as usize;
        let items = mine
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Ok(ConversationPage {
            items,
            total,
            page,
            page_size,
        })
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.conversations.len();
        inner.conversations.retain(|c| &c.id != id);
        inner.messages.retain(|(_, m)| &m.conversation_id != id);
        Ok(inner.conversations.len() < before)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut found: Vec<(u64, Message)> = inner
            .messages
            .iter()
            .filter(|(_, m)| &m.conversation_id == id)
            .cloned()
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found.into_iter().map(|(_, m)| m).collect())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let stored = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            role: message.role,
            parts: message.parts,
            metadata: message.metadata,
            created_at: Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.messages.push((seq, stored.clone()));
        Ok(stored)
    }

    async fn delete_last_message(
        &self,
        id: &ConversationId,
        role: Role,
    ) -> Result<Option<Message>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let newest = inner
            .messages
            .iter()
            .filter(|(_, m)| &m.conversation_id == id && m.role == role)
            .max_by_key(|(seq, _)| *seq)
            .map(|(seq, m)| (*seq, m.clone()));

        match newest {
            Some((seq, message)) => {
                inner.messages.retain(|(s, _)| *s != seq);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn create_usage(&self, record: UsageRecord) -> Result<(), StoreError> {
        self.inner.lock().unwrap().usage.push((Utc::now(), record));
        Ok(())
    }

    async fn overview(&self, user_id: &str) -> Result<UsageOverview, StoreError> {
        let inner = self.inner.lock().unwrap();
        let conversation_ids: Vec<&ConversationId> = inner
            .conversations
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| &c.id)
            .collect();

        let total_messages = inner
            .messages
            .iter()
            .filter(|(_, m)| conversation_ids.contains(&&m.conversation_id))
            .count() as u64;

        let mut overview = UsageOverview {
            total_conversations: conversation_ids.len() as u64,
            total_messages,
            ..UsageOverview::default()
        };

        let today = Utc::now().date_naive();
        for (at, record) in inner.usage.iter().filter(|(_, r)| r.user_id == user_id) {
            overview.total_requests += 1;
            overview.total_input_tokens += record.input_tokens as u64;
            overview.total_output_tokens += record.output_tokens as u64;
            overview.total_tokens += record.total_tokens as u64;
            overview.estimated_cost += record.estimated_cost;
            if at.date_naive() == today {
                overview.today_tokens += record.total_tokens as u64;
                overview.today_cost += record.estimated_cost;
            }
        }

        Ok(overview)
    }

    async fn daily_usage(&self, user_id: &str, days: u32) -> Result<Vec<DailyUsage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let cutoff = Utc::now().date_naive() - chrono::Days::new(days.max(1) as u64);

        let mut by_day: BTreeMap<String, DailyUsage> = BTreeMap::new();
        for (at, record) in inner.usage.iter().filter(|(_, r)| r.user_id == user_id) {
            let day = at.date_naive();
            if day < cutoff {
                continue;
            }
            let entry = by_day
                .entry(day.format("%Y-%m-%d").to_string())
                .or_insert_with(|| DailyUsage {
                    date: day.format("%Y-%m-%d").to_string(),
                    count: 0,
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                    cost: 0.0,
                });
            entry.count += 1;
            entry.input_tokens += record.input_tokens as u64;
            entry.output_tokens += record.output_tokens as u64;
            entry.total_tokens += record.total_tokens as u64;
            entry.cost += record.estimated_cost;
        }

        Ok(by_day.into_values().collect())
    }

    async fn usage_by_model(&self, user_id: &str) -> Result<Vec<ModelUsage>, StoreError> {
        let inner = self.inner.lock().unwrap();

        let mut by_model: BTreeMap<String, ModelUsage> = BTreeMap::new();
        for (_, record) in inner.usage.iter().filter(|(_, r)| r.user_id == user_id) {
            let entry = by_model
                .entry(record.model.clone())
                .or_insert_with(|| ModelUsage {
                    model: record.model.clone(),
                    count: 0,
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                    cost: 0.0,
                });
            entry.count += 1;
            entry.input_tokens += record.input_tokens as u64;
            entry.output_tokens += record.output_tokens as u64;
            entry.total_tokens += record.total_tokens as u64;
            entry.cost += record.estimated_cost;
        }

        let mut models: Vec<ModelUsage> = by_model.into_values().collect();
        models.sort_by(|a, b| b.total_tokens.cmp(&a.total_tokens));
        Ok(models)
    }

    async fn conversation_stats(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationStats, StoreError> {
        let inner = self.inner.lock().unwrap();

        let mut stats = ConversationStats {
            message_count: inner
                .messages
                .iter()
                .filter(|(_, m)| &m.conversation_id == id)
                .count() as u64,
            ..ConversationStats::default()
        };

        for (_, record) in inner.usage.iter().filter(|(_, r)| &r.conversation_id == id) {
            stats.request_count += 1;
            stats.input_tokens += record.input_tokens as u64;
            stats.output_tokens += record.output_tokens as u64;
            stats.total_tokens += record.total_tokens as u64;
            stats.estimated_cost += record.estimated_cost;
        }

        Ok(stats)
    }

    async fn top_conversations(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<TopConversation>, StoreError> {
        let inner = self.inner.lock().unwrap();

        let mut by_conversation: BTreeMap<String, TopConversation> = BTreeMap::new();
        for (_, record) in inner.usage.iter().filter(|(_, r)| r.user_id == user_id) {
            let entry = by_conversation
                .entry(record.conversation_id.0.clone())
                .or_insert_with(|| TopConversation {
                    conversation_id: record.conversation_id.clone(),
                    title: inner
                        .conversations
                        .iter()
                        .find(|c| c.id == record.conversation_id)
                        .and_then(|c| c.title.clone()),
                    request_count: 0,
                    total_tokens: 0,
                    cost: 0.0,
                });
            entry.request_count += 1;
            entry.total_tokens += record.total_tokens as u64;
            entry.cost += record.estimated_cost;
        }

        let mut ranked: Vec<TopConversation> = by_conversation.into_values().collect();
        ranked.sort_by(|a, b| b.total_tokens.cmp(&a.total_tokens));
        ranked.truncate(limit.clamp(1, 100) as usize);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::{MessageMetadata, MessagePart};

    fn new_message(conversation_id: &ConversationId, role: Role, text: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.clone(),
            role,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata::default(),
        }
    }

    #[tokio::test]
    async fn ordering_matches_insertion() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("u1", None).await.unwrap();

        store
            .create_message(new_message(&conv.id, Role::User, "one"))
            .await
            .unwrap();
        store
            .create_message(new_message(&conv.id, Role::Assistant, "two"))
            .await
            .unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].prompt_text(), "one");
        assert_eq!(messages[1].prompt_text(), "two");
    }

    #[tokio::test]
    async fn delete_last_only_touches_matching_role() {
        let store = MemoryStore::new();
        let conv = store.create_conversation("u1", None).await.unwrap();

        store
            .create_message(new_message(&conv.id, Role::User, "q"))
            .await
            .unwrap();
        store
            .create_message(new_message(&conv.id, Role::Assistant, "a"))
            .await
            .unwrap();

        let deleted = store
            .delete_last_message(&conv.id, Role::Assistant)
            .await
            .unwrap();
        assert!(deleted.is_some());
        assert!(
            store
                .delete_last_message(&conv.id, Role::Assistant)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.message_count(), 1);
    }

    fn usage(conv: &ConversationId, message_id: &str, model: &str, tokens: u32, cost: f64) -> UsageRecord {
        UsageRecord {
            user_id: "u1".into(),
            conversation_id: conv.clone(),
            message_id: message_id.into(),
            model: model.into(),
            input_tokens: tokens / 3,
            output_tokens: tokens - tokens / 3,
            total_tokens: tokens,
            cached_input_tokens: 0,
            reasoning_tokens: 0,
            estimated_cost: cost,
        }
    }

    #[tokio::test]
    async fn aggregations_window_group_and_rank() {
        let store = MemoryStore::new();
        let small = store.create_conversation("u1", Some("small".into())).await.unwrap();
        let big = store.create_conversation("u1", Some("big".into())).await.unwrap();
        store
            .create_message(new_message(&big.id, Role::User, "q"))
            .await
            .unwrap();

        store.create_usage(usage(&small.id, "m1", "deepseek-chat", 100, 0.001)).await.unwrap();
        store.create_usage(usage(&big.id, "m2", "deepseek-chat", 500, 0.005)).await.unwrap();
        store.create_usage(usage(&big.id, "m3", "deepseek-reasoner", 400, 0.008)).await.unwrap();
        store.backdate_usage("m1", Utc::now() - chrono::Days::new(45));

        let overview = store.overview("u1").await.unwrap();
        assert_eq!(overview.total_tokens, 1000);
        assert_eq!(overview.today_tokens, 900);

        // m1 is outside the 30 day window.
        let days = store.daily_usage("u1", 30).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].count, 2);
        assert_eq!(days[0].total_tokens, 900);

        let models = store.usage_by_model("u1").await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].model, "deepseek-chat");
        assert_eq!(models[0].total_tokens, 600);

        let stats = store.conversation_stats(&big.id).await.unwrap();
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.total_tokens, 900);

        let top = store.top_conversations("u1", 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].conversation_id, big.id);
        assert_eq!(top[0].title.as_deref(), Some("big"));
        assert_eq!(top[1].total_tokens, 100);
    }
}
