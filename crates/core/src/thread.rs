//! Conversation thread records — plain append-only message lists.
//!
//! Thread persistence itself is a thin collaborator concern; these are the
//! shared record types. The store lives in the memory crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Display label used when rendering thread context for the model.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "Användare",
            Role::Assistant => "Assistent",
        }
    }
}

/// A conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub user_id: String,
    pub title: String,

    /// Optional per-thread system prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,

    /// Preview of the most recent message (truncated to 100 chars).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

impl Thread {
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title
                .unwrap_or_else(|| format!("Konversation {}", now.format("%Y-%m-%d %H:%M"))),
            system_prompt: None,
            created_at: now,
            updated_at: now,
            message_count: 0,
            last_message: None,
        }
    }
}

/// A single message within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn new(thread_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
