// Integration tests for the history system.
//
// These tests exercise full workflows spanning the HistoryEngine, the
// write queue and the HistoryStore together, simulating realistic usage.

use std::sync::Arc;

use edit_history::{
    DurableHistory, HistoryConfig, HistoryEngine, HistoryStore, StoreConfig, StoreStatus,
};
use serde::{Deserialize, Serialize};

/// A small document: named shapes on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
struct Canvas {
    shapes: Vec<Shape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Shape {
    name: String,
    x: i32,
    y: i32,
}

impl Canvas {
    fn with_shape(&self, name: &str, x: i32, y: i32) -> Self {
        let mut next = self.clone();
        next.shapes.push(Shape {
            name: name.to_string(),
            x,
            y,
        });
        next
    }

    fn moved(&self, name: &str, dx: i32) -> Self {
        let mut next = self.clone();
        for shape in next.shapes.iter_mut().filter(|s| s.name == name) {
            shape.x += dx;
        }
        next
    }
}

async fn ready_store(dir: &std::path::Path) -> Arc<HistoryStore> {
    let store = HistoryStore::new(StoreConfig::in_dir(dir));
    store.initialize().await.unwrap();
    store
}

fn config(max: usize) -> HistoryConfig {
    HistoryConfig::with_max_stack_size(max)
}

// ── Full Workflow ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_workflow_execute_undo_close_reopen_undo() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    // Phase 1: 10 edits, undo 4
    let mut history =
        DurableHistory::open(Arc::clone(&store), "proj-1", Canvas::default(), config(50)).await;
    for i in 0..10 {
        let next = history.engine().current_state().with_shape(&format!("s{i}"), i, i);
        history.execute(format!("Add s{i}"), next);
    }
    for _ in 0..4 {
        assert!(history.undo().unwrap().is_some());
    }
    let document = history.engine().current_state().clone();
    assert_eq!(document.shapes.len(), 6);

    // Phase 2: close flushes the latest snapshot
    history.close().await.unwrap();

    // Phase 3: reopen with the document as the application saved it
    let mut reopened =
        DurableHistory::open(Arc::clone(&store), "proj-1", document.clone(), config(50)).await;
    assert_eq!(reopened.engine().undo_len(), 6);
    assert_eq!(reopened.engine().redo_len(), 4);
    assert_eq!(reopened.engine().redo_description(), Some("Add s6"));

    // Phase 4: redo is state-replayable after restart
    let redone = reopened.redo().unwrap();
    assert_eq!(redone.shapes.len(), 7);

    // Phase 5: undo everything back to the empty canvas
    while reopened.engine().can_undo() {
        reopened.undo().unwrap();
    }
    assert_eq!(reopened.engine().current_state(), &Canvas::default());
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_restored_entries_have_no_inverse_actions() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    let mut history =
        DurableHistory::open(Arc::clone(&store), "ctx", Canvas::default(), config(10)).await;
    let next = history.engine().current_state().with_shape("a", 0, 0);
    history.execute_with_inverse("Add a", next.clone(), || Ok(()));
    assert!(history.engine().undo_entries().all(|e| e.has_inverse_action()));
    history.close().await.unwrap();

    let persisted = store.load_history::<Canvas>("ctx").await.unwrap().unwrap();
    let engine = HistoryEngine::restore(next, persisted, config(10));
    assert_eq!(engine.undo_len(), 1);
    assert!(!engine.undo_entries().any(|e| e.has_inverse_action()));
}

#[tokio::test]
async fn test_save_point_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    let mut history =
        DurableHistory::open(Arc::clone(&store), "doc", Canvas::default(), config(10)).await;
    let first = Canvas::default().with_shape("box", 1, 1);
    history.execute("Add box", first.clone());
    history.mark_as_saved();
    let second = first.moved("box", 5);
    history.execute("Move box", second.clone());
    assert!(history.engine().has_unsaved_changes());
    history.close().await.unwrap();

    let mut reopened = DurableHistory::open(Arc::clone(&store), "doc", second, config(10)).await;
    assert!(reopened.engine().has_unsaved_changes());
    let restored = reopened.undo().unwrap().unwrap();
    assert_eq!(restored, first);
    assert!(!reopened.engine().has_unsaved_changes());
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_capacity_applies_before_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    let mut history = DurableHistory::open(Arc::clone(&store), "cap", 0u32, config(3)).await;
    for (i, label) in ["A", "B", "C", "D"].iter().enumerate() {
        history.execute(*label, i as u32 + 1);
    }
    history.flush().await.unwrap();

    let persisted = store.load_history::<u32>("cap").await.unwrap().unwrap();
    let labels: Vec<&str> = persisted
        .undo_stack
        .iter()
        .map(|e| e.description.as_str())
        .collect();
    assert_eq!(labels, vec!["B", "C", "D"]);
    history.close().await.unwrap();
}

#[tokio::test]
async fn test_smaller_capacity_on_reopen_truncates_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    let mut history = DurableHistory::open(Arc::clone(&store), "shrink", 0u32, config(10)).await;
    for i in 1..=8 {
        history.execute(format!("set {i}"), i);
    }
    history.close().await.unwrap();

    let reopened = DurableHistory::open(Arc::clone(&store), "shrink", 8u32, config(5)).await;
    let labels: Vec<String> = reopened
        .engine()
        .undo_entries()
        .map(|e| e.description().to_string())
        .collect();
    assert_eq!(labels, vec!["set 4", "set 5", "set 6", "set 7", "set 8"]);
}

#[tokio::test]
async fn test_contexts_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = ready_store(dir.path()).await;

    let mut a = DurableHistory::open(Arc::clone(&store), "a", 0i32, config(10)).await;
    let mut b = DurableHistory::open(Arc::clone(&store), "b", 0i32, config(10)).await;
    a.execute("a1", 1);
    a.execute("a2", 2);
    b.execute("b1", 10);
    a.flush().await.unwrap();
    b.flush().await.unwrap();

    let stats = store.get_statistics().await.unwrap();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_history_entries, 3);

    a.discard().await.unwrap();
    assert!(store.load_history::<i32>("a").await.unwrap().is_none());
    assert!(store.load_history::<i32>("b").await.unwrap().is_some());
    b.close().await.unwrap();
}

#[tokio::test]
async fn test_store_shared_across_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::new(StoreConfig::in_dir(dir.path()));

    let mut handles = Vec::new();
    for n in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.initialize().await.unwrap();
            let mut history =
                DurableHistory::open(Arc::clone(&store), format!("ctx-{n}"), 0i32, config(10))
                    .await;
            history.execute("bump", n);
            history.close().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.status(), StoreStatus::Ready);
    assert_eq!(store.list_histories().await.unwrap().len(), 4);
}
