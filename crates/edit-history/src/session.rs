/// Durable editing session: one engine plus its background writer.
///
/// Every stack-mutating call enqueues a snapshot for the store. Persistence
/// failures are logged by the writer and never reach the edit path; they only
/// surface from an explicit [`DurableHistory::flush`].
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::HistoryConfig;
use crate::engine::{HistoryEngine, HistoryError};
use crate::store::{HistoryStore, StoreError};
use crate::writer::HistoryWriter;

/// History for one context, optionally backed by the durable store.
pub struct DurableHistory<T> {
    context_id: String,
    engine: HistoryEngine<T>,
    writer: Option<HistoryWriter<T>>,
    store: Option<Arc<HistoryStore>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for DurableHistory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableHistory")
            .field("context_id", &self.context_id)
            .field("engine", &self.engine)
            .field("durable", &self.writer.is_some())
            .finish()
    }
}

impl<T> DurableHistory<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens history for `context_id`, seeding it from the store.
    ///
    /// `current_state` is the document as the caller loaded it. A missing,
    /// corrupt or unreadable record starts a fresh history; durability stays
    /// enabled either way. Must be called within a tokio runtime.
    pub async fn open(
        store: Arc<HistoryStore>,
        context_id: impl Into<String>,
        current_state: T,
        config: HistoryConfig,
    ) -> Self {
        let context_id = context_id.into();
        let engine = match store.load_history::<T>(&context_id).await {
            Ok(Some(persisted)) => {
                tracing::info!(
                    "Restored history for '{context_id}' ({} undo, {} redo)",
                    persisted.undo_stack.len(),
                    persisted.redo_stack.len()
                );
                HistoryEngine::restore(current_state, persisted, config)
            }
            Ok(None) => HistoryEngine::new(current_state, config),
            Err(e) => {
                tracing::warn!("Failed to load history for '{context_id}', starting fresh: {e}");
                HistoryEngine::new(current_state, config)
            }
        };
        let writer = HistoryWriter::spawn(Arc::clone(&store), context_id.clone());
        Self {
            context_id,
            engine,
            writer: Some(writer),
            store: Some(store),
        }
    }

    /// History that is never persisted.
    pub fn in_memory(
        context_id: impl Into<String>,
        initial_state: T,
        config: HistoryConfig,
    ) -> Self {
        Self {
            context_id: context_id.into(),
            engine: HistoryEngine::new(initial_state, config),
            writer: None,
            store: None,
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Read access to the engine for queries.
    pub fn engine(&self) -> &HistoryEngine<T> {
        &self.engine
    }

    pub fn is_durable(&self) -> bool {
        self.writer.is_some()
    }

    pub fn execute(&mut self, description: impl Into<String>, new_state: T) {
        self.engine.execute(description, new_state);
        self.schedule_save();
    }

    pub fn execute_with_inverse<F>(
        &mut self,
        description: impl Into<String>,
        new_state: T,
        inverse: F,
    ) where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.engine.execute_with_inverse(description, new_state, inverse);
        self.schedule_save();
    }

    /// Undoes the most recent change. The save is scheduled even when the
    /// inverse action fails, since the stacks have already moved.
    ///
    /// # Errors
    ///
    /// Propagates [`HistoryError::InverseAction`].
    pub fn undo(&mut self) -> Result<Option<T>, HistoryError> {
        let result = self.engine.undo();
        if !matches!(result, Ok(None)) {
            self.schedule_save();
        }
        result
    }

    pub fn redo(&mut self) -> Option<T> {
        let restored = self.engine.redo();
        if restored.is_some() {
            self.schedule_save();
        }
        restored
    }

    pub fn mark_as_saved(&mut self) {
        self.engine.mark_as_saved();
        self.schedule_save();
    }

    pub fn clear_history(&mut self) {
        self.engine.clear_history();
        self.schedule_save();
    }

    /// Waits for the latest scheduled write. No-op for in-memory history.
    ///
    /// # Errors
    ///
    /// Returns the error of the latest write if it failed.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// Flushes pending writes and returns the engine.
    ///
    /// # Errors
    ///
    /// Returns the flush error; the engine is dropped in that case since the
    /// in-memory session is over either way.
    pub async fn close(mut self) -> Result<HistoryEngine<T>, StoreError> {
        if let Some(writer) = self.writer.take() {
            writer.close().await?;
        }
        Ok(self.engine)
    }

    /// Stops persisting and deletes the stored record, for a context that is
    /// gone for good.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn discard(mut self) -> Result<(), StoreError> {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                tracing::debug!(
                    "Ignoring write failure for discarded '{}': {e}",
                    self.context_id
                );
            }
        }
        if let Some(store) = self.store.take() {
            store.delete_history(&self.context_id).await?;
        }
        Ok(())
    }

    fn schedule_save(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.enqueue(self.engine.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    async fn ready_store(dir: &TempDir) -> Arc<HistoryStore> {
        let store = HistoryStore::new(StoreConfig::in_dir(dir.path()));
        store.initialize().await.expect("initialize");
        store
    }

    #[tokio::test]
    async fn test_in_memory_history_never_persists() {
        let mut history =
            DurableHistory::in_memory("scratch", String::new(), HistoryConfig::default());
        history.execute("type", "hello".to_string());
        assert!(!history.is_durable());
        history.flush().await.expect("flush");

        let engine = history.close().await.expect("close");
        assert_eq!(engine.current_state(), "hello");
    }

    #[tokio::test]
    async fn test_open_without_record_starts_fresh() {
        let dir = TempDir::new().expect("create temp dir");
        let store = ready_store(&dir).await;
        let history = DurableHistory::open(
            store,
            "proj-1",
            "draft".to_string(),
            HistoryConfig::default(),
        )
        .await;
        assert!(history.is_durable());
        assert!(!history.engine().can_undo());
        assert_eq!(history.engine().current_state(), "draft");
    }

    #[tokio::test]
    async fn test_open_with_uninitialized_store_stays_usable() {
        let dir = TempDir::new().expect("create temp dir");
        let store = HistoryStore::new(StoreConfig::in_dir(dir.path()));
        let mut history =
            DurableHistory::open(store, "proj-1", 0i64, HistoryConfig::default()).await;

        history.execute("increment", 1);
        history.execute("increment", 2);
        assert_eq!(history.undo().expect("undo"), Some(1));
        assert!(history.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_discard_deletes_record() {
        let dir = TempDir::new().expect("create temp dir");
        let store = ready_store(&dir).await;
        let mut history =
            DurableHistory::open(Arc::clone(&store), "gone", 0i64, HistoryConfig::default()).await;
        history.execute("increment", 1);
        history.flush().await.expect("flush");
        assert!(store.load_history::<i64>("gone").await.expect("load").is_some());

        history.discard().await.expect("discard");
        assert!(store.load_history::<i64>("gone").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_noop_undo_does_not_schedule_save() {
        let dir = TempDir::new().expect("create temp dir");
        let store = ready_store(&dir).await;
        let mut history =
            DurableHistory::open(Arc::clone(&store), "idle", 0i64, HistoryConfig::default()).await;
        assert_eq!(history.undo().expect("undo"), None);
        assert_eq!(history.redo(), None);
        history.flush().await.expect("flush");

        assert!(store.load_history::<i64>("idle").await.expect("load").is_none());
    }
}
