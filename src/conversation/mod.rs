//! Per-thread conversation-history persistence (spec.md §4.1, §5): the
//! orchestrator keys one append-only [`ConversationEntry`] log per
//! conversation thread so a retried query can be re-issued with its prior
//! turns intact.
//!
//! Persistence is pluggable via the [`ConversationStore`] trait so the
//! default in-process implementation carries no desktop-app dependency, the
//! same way [`crate::vectorstore::VectorStore`] abstracts over its backing
//! index.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{CoreError, CoreResult};
use crate::models::ConversationEntry;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append `entries` to `thread_id`'s log, creating it if absent.
    async fn append(&self, thread_id: &str, entries: Vec<ConversationEntry>) -> CoreResult<()>;

    /// The full log for `thread_id`, oldest first; empty if the thread has
    /// no recorded history.
    async fn load(&self, thread_id: &str) -> CoreResult<Vec<ConversationEntry>>;

    /// Drop `thread_id`'s log entirely.
    async fn clear(&self, thread_id: &str) -> CoreResult<()>;
}

/// In-process default: one `Vec<ConversationEntry>` per thread, guarded by
/// an `RwLock` the way [`crate::vectorstore::InMemoryVectorStore`] guards
/// its record list. Nothing is persisted across process restarts; callers
/// who need durability provide their own [`ConversationStore`].
#[derive(Default)]
pub struct InMemoryConversationStore {
    threads: RwLock<HashMap<String, Vec<ConversationEntry>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, thread_id: &str, entries: Vec<ConversationEntry>) -> CoreResult<()> {
        let mut threads = self.threads.write().map_err(|_| CoreError::StorageError("conversation store lock poisoned".into()))?;
        threads.entry(thread_id.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> CoreResult<Vec<ConversationEntry>> {
        let threads = self.threads.read().map_err(|_| CoreError::StorageError("conversation store lock poisoned".into()))?;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, thread_id: &str) -> CoreResult<()> {
        let mut threads = self.threads.write().map_err(|_| CoreError::StorageError("conversation store lock poisoned".into()))?;
        threads.remove(thread_id);
        Ok(())
    }
}

/// Truncate `history` to its last `limit` entries, the way
/// [`crate::config::OrchestratorConfig::conversation_history_limit`] bounds
/// how many prior turns are folded into an agent prompt.
pub fn last_n(history: &[ConversationEntry], limit: usize) -> &[ConversationEntry] {
    if history.len() <= limit {
        history
    } else {
        &history[history.len() - limit..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationEntry;

    #[tokio::test]
    async fn append_then_load_round_trips_in_order() {
        let store = InMemoryConversationStore::new();
        store.append("t1", vec![ConversationEntry::system("start")]).await.unwrap();
        store.append("t1", vec![ConversationEntry::agent("selector ran")]).await.unwrap();

        let history = store.load("t1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "start");
        assert_eq!(history[1].content, "selector ran");
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let store = InMemoryConversationStore::new();
        store.append("t1", vec![ConversationEntry::system("a")]).await.unwrap();
        store.append("t2", vec![ConversationEntry::system("b")]).await.unwrap();

        assert_eq!(store.load("t1").await.unwrap().len(), 1);
        assert_eq!(store.load("t2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_the_thread() {
        let store = InMemoryConversationStore::new();
        store.append("t1", vec![ConversationEntry::system("a")]).await.unwrap();
        store.clear("t1").await.unwrap();
        assert!(store.load("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_thread_loads_as_empty() {
        let store = InMemoryConversationStore::new();
        assert!(store.load("ghost").await.unwrap().is_empty());
    }

    #[test]
    fn last_n_keeps_only_the_tail() {
        let history: Vec<ConversationEntry> = (0..5).map(|i| ConversationEntry::system(format!("entry {i}"))).collect();
        let tail = last_n(&history, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].content, "entry 3");
        assert_eq!(tail[1].content, "entry 4");
    }

    #[test]
    fn last_n_is_a_no_op_when_under_the_limit() {
        let history: Vec<ConversationEntry> = (0..2).map(|i| ConversationEntry::system(format!("entry {i}"))).collect();
        assert_eq!(last_n(&history, 5).len(), 2);
    }
}
