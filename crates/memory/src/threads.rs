//! Conversation thread storage.
//!
//! In-memory, append-only message lists per thread. Threads cap their
//! message history to keep context assembly bounded; the cap drops the
//! oldest messages, never the newest.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use minne_core::error::ThreadError;
use minne_core::{Role, Thread, ThreadMessage};

/// Messages kept per thread.
const MAX_MESSAGES_PER_THREAD: usize = 50;
/// Most recent messages rendered into thread context.
const MAX_CONTEXT_MESSAGES: usize = 20;
/// Preview length for a thread's last message.
const PREVIEW_LEN: usize = 100;

#[derive(Clone, Default)]
pub struct ThreadStore {
    threads: Arc<RwLock<HashMap<String, Thread>>>,
    messages: Arc<RwLock<HashMap<String, Vec<ThreadMessage>>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_thread(
        &self,
        user_id: &str,
        title: Option<String>,
        system_prompt: Option<String>,
    ) -> Thread {
        let mut thread = Thread::new(user_id, title);
        thread.system_prompt = system_prompt;
        self.messages
            .write()
            .await
            .insert(thread.thread_id.clone(), Vec::new());
        self.threads
            .write()
            .await
            .insert(thread.thread_id.clone(), thread.clone());
        debug!(thread_id = %thread.thread_id, user_id, "Thread created");
        thread
    }

    pub async fn get_thread(&self, thread_id: &str) -> Option<Thread> {
        self.threads.read().await.get(thread_id).cloned()
    }

    /// The thread, verified to belong to `user_id`.
    pub async fn get_owned_thread(
        &self,
        thread_id: &str,
        user_id: &str,
    ) -> Result<Thread, ThreadError> {
        let thread = self
            .get_thread(thread_id)
            .await
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        if thread.user_id != user_id {
            return Err(ThreadError::AccessDenied {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(thread)
    }

    /// All threads owned by a user, most recently updated first.
    pub async fn list_threads(&self, user_id: &str) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self
            .threads
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    /// Append a message, enforcing the per-thread cap and updating the
    /// thread's counters and preview.
    pub async fn add_message(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
    ) -> Result<ThreadMessage, ThreadError> {
        let message = ThreadMessage::new(thread_id, role, content);
        {
            let mut messages = self.messages.write().await;
            let list = messages
                .get_mut(thread_id)
                .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
            list.push(message.clone());
            while list.len() > MAX_MESSAGES_PER_THREAD {
                list.remove(0);
            }
        }
        let mut threads = self.threads.write().await;
        if let Some(thread) = threads.get_mut(thread_id) {
            thread.message_count += 1;
            thread.updated_at = message.timestamp;
            thread.last_message = Some(content.chars().take(PREVIEW_LEN).collect());
        }
        Ok(message)
    }

    pub async fn thread_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ThreadMessage>, ThreadError> {
        let messages = self.messages.read().await;
        let list = messages
            .get(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        let skip = limit.map_or(0, |l| list.len().saturating_sub(l));
        Ok(list[skip..].to_vec())
    }

    /// The thread transcript rendered for context assembly: the most
    /// recent messages, labeled, joined by blank lines. Empty string for
    /// an empty thread.
    pub async fn thread_context(&self, thread_id: &str) -> Result<String, ThreadError> {
        let messages = self.messages.read().await;
        let list = messages
            .get(thread_id)
            .ok_or_else(|| ThreadError::NotFound(thread_id.to_string()))?;
        let skip = list.len().saturating_sub(MAX_CONTEXT_MESSAGES);
        Ok(list[skip..]
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    /// Delete a thread. Only the owner may delete; deleting someone
    /// else's thread reports access denied, a missing thread not-found.
    pub async fn delete_thread(&self, thread_id: &str, user_id: &str) -> Result<(), ThreadError> {
        self.get_owned_thread(thread_id, user_id).await?;
        self.threads.write().await.remove(thread_id);
        self.messages.write().await.remove(thread_id);
        debug!(thread_id, user_id, "Thread deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_thread() {
        let store = ThreadStore::new();
        let thread = store.create_thread("u1", Some("Planering".into()), None).await;
        let fetched = store.get_thread(&thread.thread_id).await.unwrap();
        assert_eq!(fetched.title, "Planering");
        assert_eq!(fetched.message_count, 0);
    }

    #[tokio::test]
    async fn ownership_is_enforced() {
        let store = ThreadStore::new();
        let thread = store.create_thread("u1", None, None).await;
        assert!(store.get_owned_thread(&thread.thread_id, "u1").await.is_ok());
        assert!(matches!(
            store.get_owned_thread(&thread.thread_id, "u2").await,
            Err(ThreadError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.get_owned_thread("saknas", "u1").await,
            Err(ThreadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn message_cap_drops_oldest() {
        let store = ThreadStore::new();
        let thread = store.create_thread("u1", None, None).await;
        for i in 0..55 {
            store
                .add_message(&thread.thread_id, Role::User, &format!("meddelande {i}"))
                .await
                .unwrap();
        }
        let messages = store.thread_messages(&thread.thread_id, None).await.unwrap();
        assert_eq!(messages.len(), 50);
        assert_eq!(messages[0].content, "meddelande 5");
        // The counter tracks every message ever added.
        let fetched = store.get_thread(&thread.thread_id).await.unwrap();
        assert_eq!(fetched.message_count, 55);
        assert_eq!(fetched.last_message.as_deref(), Some("meddelande 54"));
    }

    #[tokio::test]
    async fn context_renders_labeled_recent_messages() {
        let store = ThreadStore::new();
        let thread = store.create_thread("u1", None, None).await;
        for i in 0..25 {
            store
                .add_message(&thread.thread_id, Role::User, &format!("fråga {i}"))
                .await
                .unwrap();
            store
                .add_message(&thread.thread_id, Role::Assistant, &format!("svar {i}"))
                .await
                .unwrap();
        }
        let context = store.thread_context(&thread.thread_id).await.unwrap();
        // Only the 20 most recent messages appear.
        assert!(!context.contains("fråga 14"));
        assert!(context.contains("Användare: fråga 15"));
        assert!(context.contains("Assistent: svar 24"));
    }

    #[tokio::test]
    async fn list_is_sorted_by_recency() {
        let store = ThreadStore::new();
        let first = store.create_thread("u1", Some("första".into()), None).await;
        let second = store.create_thread("u1", Some("andra".into()), None).await;
        store.create_thread("annan", None, None).await;

        store.add_message(&first.thread_id, Role::User, "hej").await.unwrap();
        let threads = store.list_threads("u1").await;
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id, first.thread_id);
        assert_eq!(threads[1].thread_id, second.thread_id);
    }

    #[tokio::test]
    async fn only_owner_may_delete() {
        let store = ThreadStore::new();
        let thread = store.create_thread("u1", None, None).await;
        assert!(store.delete_thread(&thread.thread_id, "u2").await.is_err());
        assert!(store.delete_thread(&thread.thread_id, "u1").await.is_ok());
        assert!(store.get_thread(&thread.thread_id).await.is_none());
    }
}
