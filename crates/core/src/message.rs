//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the entire system:
//! the caller posts a user message → the pipeline streams a reply →
//! the finished reply is persisted as an assistant message with parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("Unknown role: '{other}'")),
        }
    }
}

/// One typed fragment of a message.
///
/// A persisted assistant message holds at most one `Reasoning` part (the
/// merged reasoning stream) followed by at most one `Text` part. User
/// messages hold a single `Text` part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    /// The model's visible reasoning output.
    Reasoning { text: String },
    /// Ordinary answer text.
    Text { text: String },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// The raw text payload regardless of kind.
    pub fn payload(&self) -> &str {
        match self {
            Self::Reasoning { text } | Self::Text { text } => text,
        }
    }
}

/// Metadata recorded on a persisted assistant message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The logical model name requested (e.g. "deepseek-chat").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The backend model id the provider reported in its final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.model_id.is_none()
    }
}

/// A single persisted message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// The conversation this message belongs to
    pub conversation_id: ConversationId,

    /// Who sent this message
    pub role: Role,

    /// Ordered, typed content fragments
    pub parts: Vec<MessagePart>,

    /// Provider metadata (assistant messages only)
    #[serde(default, skip_serializing_if = "MessageMetadata::is_empty")]
    pub metadata: MessageMetadata,

    /// Timestamp — conversation ordering is created_at ascending
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message with a single text part.
    pub fn user(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::User,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata::default(),
            created_at: Utc::now(),
        }
    }

    /// Create a new assistant message from assembled parts.
    pub fn assistant(
        conversation_id: ConversationId,
        parts: Vec<MessagePart>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role: Role::Assistant,
            parts,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text-part content — what gets replayed to the model
    /// as prompt history. Reasoning parts are not replayed.
    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Reasoning { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A conversation owned by a user. Messages are stored separately and
/// ordered by creation timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Owning user
    pub user_id: String,

    /// Optional title (user-set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation for a user.
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: ConversationId::new(),
            user_id: user_id.into(),
            title,
            created_at: Utc::now(),
        }
    }
}
