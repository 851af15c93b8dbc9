//! Per-user memory state.
//!
//! A process-lifetime cache keyed by user id. Entries are created lazily
//! on first access and never evicted. Concurrent requests for the same
//! user may race on turn append and persona update; last writer wins,
//! which is acceptable for this data.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use minne_core::{Role, ThreadMessage};

/// Everything the runtime remembers about one user between requests.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub user_id: String,
    pub persona_digest: Option<String>,
    pub persona_updated_at: Option<DateTime<Local>>,
    /// Short-term turn buffer, newest last, bounded FIFO.
    pub short_term_turns: VecDeque<String>,
    /// Cache of the most recently composed context string.
    pub last_composed_context: String,
    pub last_turn_at: Option<DateTime<Local>>,
}

impl MemoryContext {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            persona_digest: None,
            persona_updated_at: None,
            short_term_turns: VecDeque::new(),
            last_composed_context: String::new(),
            last_turn_at: None,
        }
    }
}

/// Memory statistics for one user, as exposed to diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub user_id: String,
    pub cached: bool,
    pub has_context: bool,
    pub context_length: usize,
    pub has_persona: bool,
    pub persona_updated_at: Option<String>,
    pub short_term_turns: usize,
}

/// The per-user memory store.
#[derive(Clone)]
pub struct MemoryStore {
    users: Arc<RwLock<HashMap<String, MemoryContext>>>,
    short_term_capacity: usize,
}

impl MemoryStore {
    pub fn new(short_term_capacity: usize) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            short_term_capacity,
        }
    }

    /// A point-in-time copy of one user's memory, creating the entry if
    /// this is the first time we see the user.
    pub async fn snapshot(&self, user_id: &str) -> MemoryContext {
        let mut users = self.users.write().await;
        users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user_id, "New user memory created");
                MemoryContext::new(user_id)
            })
            .clone()
    }

    /// Record one completed exchange in the short-term buffer. Oldest
    /// turn is evicted once the buffer is full.
    pub async fn record_turn(&self, user_id: &str, user_message: &str, assistant_reply: &str) {
        let entry = format!(
            "{}: {user_message}\n{}: {assistant_reply}",
            Role::User.label(),
            Role::Assistant.label()
        );
        let mut users = self.users.write().await;
        let memory = users
            .entry(user_id.to_string())
            .or_insert_with(|| MemoryContext::new(user_id));
        memory.short_term_turns.push_back(entry);
        while memory.short_term_turns.len() > self.short_term_capacity {
            memory.short_term_turns.pop_front();
        }
        memory.last_turn_at = Some(Local::now());
        debug!(user_id, turns = memory.short_term_turns.len(), "Short-term memory updated");
    }

    /// The most recent turns joined with blank lines, newest last.
    /// Empty string when the buffer is empty.
    pub async fn recent_turns(&self, user_id: &str, limit: usize) -> String {
        let users = self.users.read().await;
        let Some(memory) = users.get(user_id) else {
            return String::new();
        };
        let skip = memory.short_term_turns.len().saturating_sub(limit);
        memory
            .short_term_turns
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Seed the short-term buffer from persisted thread messages, pairing
    /// user/assistant turns. Used when a conversation continues in a
    /// thread after a restart.
    pub async fn seed_from_messages(&self, user_id: &str, messages: &[ThreadMessage]) {
        let mut pending_user: Option<&str> = None;
        for msg in messages {
            match msg.role {
                Role::User => pending_user = Some(&msg.content),
                Role::Assistant => {
                    if let Some(user_msg) = pending_user.take() {
                        self.record_turn(user_id, user_msg, &msg.content).await;
                    }
                }
            }
        }
    }

    pub async fn set_persona(&self, user_id: &str, digest: String) {
        let mut users = self.users.write().await;
        let memory = users
            .entry(user_id.to_string())
            .or_insert_with(|| MemoryContext::new(user_id));
        memory.persona_digest = Some(digest);
        memory.persona_updated_at = Some(Local::now());
    }

    /// True when the persona digest is absent or older than `max_age`.
    pub async fn persona_is_stale(&self, user_id: &str, max_age: Duration) -> bool {
        let users = self.users.read().await;
        let Some(memory) = users.get(user_id) else {
            return true;
        };
        if memory.persona_digest.is_none() {
            return true;
        }
        match memory.persona_updated_at {
            Some(at) => {
                let age = Local::now().signed_duration_since(at);
                age.num_seconds() >= max_age.as_secs() as i64
            }
            None => true,
        }
    }

    /// Cache the most recently composed context for fallback reuse.
    pub async fn set_last_context(&self, user_id: &str, context: String) {
        let mut users = self.users.write().await;
        let memory = users
            .entry(user_id.to_string())
            .or_insert_with(|| MemoryContext::new(user_id));
        memory.last_composed_context = context;
    }

    pub async fn stats(&self, user_id: &str) -> MemoryStats {
        let users = self.users.read().await;
        match users.get(user_id) {
            Some(memory) => MemoryStats {
                user_id: user_id.to_string(),
                cached: true,
                has_context: !memory.last_composed_context.is_empty(),
                context_length: memory.last_composed_context.len(),
                has_persona: memory.persona_digest.is_some(),
                persona_updated_at: memory.persona_updated_at.map(|t| t.to_rfc3339()),
                short_term_turns: memory.short_term_turns.len(),
            },
            None => MemoryStats {
                user_id: user_id.to_string(),
                cached: false,
                has_context: false,
                context_length: 0,
                has_persona: false,
                persona_updated_at: None,
                short_term_turns: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn turn_buffer_is_fifo_bounded() {
        let store = MemoryStore::new(5);
        for i in 0..7 {
            store.record_turn("u1", &format!("fråga {i}"), &format!("svar {i}")).await;
        }
        let memory = store.snapshot("u1").await;
        assert_eq!(memory.short_term_turns.len(), 5);
        // Oldest two evicted.
        assert!(memory.short_term_turns[0].contains("fråga 2"));
        assert!(memory.short_term_turns[4].contains("fråga 6"));
    }

    #[tokio::test]
    async fn turns_carry_swedish_labels() {
        let store = MemoryStore::new(5);
        store.record_turn("u1", "Hej, jag heter Jonas", "Hej Jonas!").await;
        let recent = store.recent_turns("u1", 3).await;
        assert_eq!(recent, "Användare: Hej, jag heter Jonas\nAssistent: Hej Jonas!");
    }

    #[tokio::test]
    async fn recent_turns_limits_from_the_end() {
        let store = MemoryStore::new(5);
        for i in 0..5 {
            store.record_turn("u1", &format!("f{i}"), &format!("s{i}")).await;
        }
        let recent = store.recent_turns("u1", 3).await;
        assert!(!recent.contains("f1"));
        assert!(recent.contains("f2"));
        assert!(recent.contains("f4"));
    }

    #[tokio::test]
    async fn unknown_user_has_empty_recent_turns() {
        let store = MemoryStore::new(5);
        assert_eq!(store.recent_turns("ingen", 3).await, "");
    }

    #[tokio::test]
    async fn persona_staleness() {
        let store = MemoryStore::new(5);
        assert!(store.persona_is_stale("u1", Duration::from_secs(600)).await);
        store.set_persona("u1", "gillar kaffe".into()).await;
        assert!(!store.persona_is_stale("u1", Duration::from_secs(600)).await);
        assert!(store.persona_is_stale("u1", Duration::from_secs(0)).await);
    }

    #[tokio::test]
    async fn stats_reflect_state() {
        let store = MemoryStore::new(5);
        let empty = store.stats("u1").await;
        assert!(!empty.cached);

        store.record_turn("u1", "hej", "hejsan").await;
        store.set_last_context("u1", "## Om användaren:\ngillar kaffe".into()).await;
        let stats = store.stats("u1").await;
        assert!(stats.cached);
        assert!(stats.has_context);
        assert_eq!(stats.short_term_turns, 1);
        assert!(!stats.has_persona);
    }

    #[tokio::test]
    async fn seed_from_messages_pairs_turns() {
        let store = MemoryStore::new(5);
        let thread_id = "t1";
        let messages = vec![
            ThreadMessage::new(thread_id, Role::User, "Hej, jag heter Jonas"),
            ThreadMessage::new(thread_id, Role::Assistant, "Hej Jonas!"),
            ThreadMessage::new(thread_id, Role::User, "obesvarad"),
        ];
        store.seed_from_messages("u1", &messages).await;
        let recent = store.recent_turns("u1", 5).await;
        assert!(recent.contains("Jonas"));
        assert!(!recent.contains("obesvarad"));
    }
}
