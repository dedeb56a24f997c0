/// Single-slot, latest-wins write queue between an engine and the store.
///
/// Each context gets one background task. Enqueueing replaces whatever
/// snapshot is still waiting, so a slow disk never sees out-of-order
/// overwrites and the edit path never blocks.
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::entry::HistorySnapshot;
use crate::store::{HistoryStore, StoreError};

struct Queued<T> {
    generation: u64,
    snapshot: Arc<HistorySnapshot<T>>,
}

impl<T> Clone for Queued<T> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            snapshot: Arc::clone(&self.snapshot),
        }
    }
}

/// Outcome of the most recent write the task finished.
#[derive(Debug, Clone, Default)]
struct Settled {
    generation: u64,
    error: Option<String>,
}

/// Background writer persisting snapshots for one context.
pub struct HistoryWriter<T> {
    context_id: String,
    generation: u64,
    pending: watch::Sender<Option<Queued<T>>>,
    settled: watch::Receiver<Settled>,
    task: Option<JoinHandle<()>>,
}

impl<T> std::fmt::Debug for HistoryWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryWriter")
            .field("context_id", &self.context_id)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> HistoryWriter<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Starts the writer task. Must be called within a tokio runtime.
    pub fn spawn(store: Arc<HistoryStore>, context_id: impl Into<String>) -> Self {
        let context_id = context_id.into();
        let (pending_tx, pending_rx) = watch::channel(None);
        let (settled_tx, settled_rx) = watch::channel(Settled::default());
        let task = tokio::spawn(drain(store, context_id.clone(), pending_rx, settled_tx));
        Self {
            context_id,
            generation: 0,
            pending: pending_tx,
            settled: settled_rx,
            task: Some(task),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Queues `snapshot`, replacing any snapshot not yet written.
    pub fn enqueue(&mut self, snapshot: HistorySnapshot<T>) {
        self.generation += 1;
        self.pending.send_replace(Some(Queued {
            generation: self.generation,
            snapshot: Arc::new(snapshot),
        }));
    }

    /// Waits until the most recently queued snapshot has been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] if that write failed, or
    /// [`StoreError::WriterClosed`] if the task is gone.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        let target = self.generation;
        if target == 0 {
            return Ok(());
        }
        let error = self
            .settled
            .wait_for(|settled| settled.generation >= target)
            .await
            .map_err(|_| StoreError::WriterClosed {
                context_id: self.context_id.clone(),
            })?
            .error
            .clone();
        match error {
            Some(message) => Err(StoreError::WriteFailed {
                context_id: self.context_id.clone(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Flushes, then stops the task.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any. The task is stopped either way.
    pub async fn close(mut self) -> Result<(), StoreError> {
        let flushed = self.flush().await;
        let task = self.task.take();
        drop(self);
        if let Some(task) = task {
            task.await?;
        }
        flushed
    }
}

async fn drain<T>(
    store: Arc<HistoryStore>,
    context_id: String,
    mut pending: watch::Receiver<Option<Queued<T>>>,
    settled: watch::Sender<Settled>,
) where
    T: Serialize + Send + Sync + 'static,
{
    while pending.changed().await.is_ok() {
        let queued = pending.borrow_and_update().clone();
        let Some(queued) = queued else {
            continue;
        };

        let error = match store.save_snapshot(&context_id, &queued.snapshot).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Failed to persist history for '{context_id}': {e}");
                Some(e.to_string())
            }
        };
        settled.send_replace(Settled {
            generation: queued.generation,
            error,
        });
    }
    tracing::debug!("History writer for '{context_id}' stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryConfig, StoreConfig};
    use crate::engine::HistoryEngine;
    use tempfile::TempDir;

    async fn ready_store(dir: &TempDir) -> Arc<HistoryStore> {
        let store = HistoryStore::new(StoreConfig::in_dir(dir.path()));
        store.initialize().await.expect("initialize");
        store
    }

    #[tokio::test]
    async fn test_flush_without_writes_is_noop() {
        let dir = TempDir::new().expect("create temp dir");
        let store = ready_store(&dir).await;
        let mut writer: HistoryWriter<String> = HistoryWriter::spawn(store, "ctx");
        writer.flush().await.expect("flush");
        writer.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let dir = TempDir::new().expect("create temp dir");
        let store = ready_store(&dir).await;
        let mut writer = HistoryWriter::spawn(Arc::clone(&store), "ctx");
        let mut engine = HistoryEngine::new(0u32, HistoryConfig::default());

        for i in 1..=20 {
            engine.execute(format!("set {i}"), i);
            writer.enqueue(engine.snapshot());
        }
        writer.flush().await.expect("flush");

        let loaded = store
            .load_history::<u32>("ctx")
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(loaded.undo_stack.len(), 20);
        assert_eq!(loaded.undo_stack[19].description, "set 20");
        writer.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_flush_reports_failed_write() {
        let dir = TempDir::new().expect("create temp dir");
        // Never initialized: every write fails.
        let store = HistoryStore::new(StoreConfig::in_dir(dir.path()));
        let mut writer = HistoryWriter::spawn(store, "ctx");
        writer.enqueue(HistorySnapshot::<String>::empty());

        let err = writer.flush().await.expect_err("flush should fail");
        assert!(matches!(err, StoreError::WriteFailed { .. }));
        assert!(writer.close().await.is_err());
    }
}
