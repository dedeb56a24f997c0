/// Core undo/redo engine.
///
/// Holds two capacity-bounded stacks of state snapshots, the live current
/// state, and a save-point marker. Pure and synchronous: persistence is layered
/// on top by [`crate::session::DurableHistory`].
use std::collections::VecDeque;

use thiserror::Error;

use crate::config::HistoryConfig;
use crate::entry::{EntryId, HistoryEntry, HistorySnapshot, InverseAction, PersistedHistory};

/// Errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A caller-supplied inverse action failed during undo.
    ///
    /// The stacks and current state are already updated when this is returned;
    /// only the caller's document may be out of sync.
    #[error("inverse action for '{description}' failed")]
    InverseAction {
        description: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Manages undo/redo history for a single editing context.
///
/// Each context gets its own `HistoryEngine`. Methods take `&mut self`, so
/// callers serialize access the same way they serialize edits.
pub struct HistoryEngine<T> {
    /// Undo stack, oldest first. The tail is undone next.
    undo_stack: VecDeque<HistoryEntry<T>>,
    /// Redo stack, most-recently-undone at the tail.
    redo_stack: VecDeque<HistoryEntry<T>>,
    /// Live, authoritative state.
    current: T,
    /// Capacity of each stack.
    max_stack_size: usize,
    /// Id of the undo-stack top at the last save, `None` for the pristine state.
    saved_state_id: Option<EntryId>,
    /// Next id to assign.
    next_id: u64,
}

impl<T: std::fmt::Debug> std::fmt::Debug for HistoryEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEngine")
            .field("current", &self.current)
            .field("undo_len", &self.undo_stack.len())
            .field("redo_len", &self.redo_stack.len())
            .field("max_stack_size", &self.max_stack_size)
            .field("saved_state_id", &self.saved_state_id)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl<T> HistoryEngine<T> {
    /// Creates an engine with empty stacks around `initial_state`.
    pub fn new(initial_state: T, config: HistoryConfig) -> Self {
        let config = config.sanitized();
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            current: initial_state,
            max_stack_size: config.max_stack_size,
            saved_state_id: None,
            next_id: 0,
        }
    }

    /// Seeds an engine from a persisted record.
    ///
    /// `current_state` is the document as loaded by the caller; the record
    /// only holds stacks. Restored entries carry no inverse actions. Stacks
    /// larger than the configured capacity lose their oldest entries.
    pub fn restore(
        current_state: T,
        persisted: PersistedHistory<T>,
        config: HistoryConfig,
    ) -> Self {
        Self::from_snapshot(current_state, persisted.into_snapshot(), config)
    }

    /// Seeds an engine from a snapshot of stacks and save point.
    pub fn from_snapshot(
        current_state: T,
        snapshot: HistorySnapshot<T>,
        config: HistoryConfig,
    ) -> Self {
        let mut engine = Self::new(current_state, config);
        let max = engine.max_stack_size;

        let next_id = snapshot
            .undo_stack
            .iter()
            .chain(snapshot.redo_stack.iter())
            .map(|entry| entry.id.get() + 1)
            .max()
            .unwrap_or(0);

        let mut undo: VecDeque<HistoryEntry<T>> =
            snapshot.undo_stack.into_iter().map(HistoryEntry::from).collect();
        let mut redo: VecDeque<HistoryEntry<T>> =
            snapshot.redo_stack.into_iter().map(HistoryEntry::from).collect();
        let dropped = evict_front(&mut undo, max) + evict_front(&mut redo, max);
        if dropped > 0 {
            tracing::debug!("Dropped {dropped} restored history entries over capacity {max}");
        }

        engine.undo_stack = undo;
        engine.redo_stack = redo;
        engine.saved_state_id = snapshot.saved_state_id;
        engine.next_id = next_id;
        engine
    }

    /// Records a change from the current state to `new_state`.
    ///
    /// The pushed entry holds the pre-change state, i.e. what undo returns to.
    /// Clears the redo stack. Evicts the oldest entries beyond capacity.
    pub fn execute(&mut self, description: impl Into<String>, new_state: T) {
        self.push_execute(description.into(), new_state, None);
    }

    /// Like [`execute`](Self::execute), with a callback run when this entry is undone.
    pub fn execute_with_inverse<F>(
        &mut self,
        description: impl Into<String>,
        new_state: T,
        inverse: F,
    ) where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.push_execute(description.into(), new_state, Some(Box::new(inverse)));
    }

    fn push_execute(&mut self, description: String, new_state: T, inverse: Option<InverseAction>) {
        let previous = std::mem::replace(&mut self.current, new_state);
        let id = self.allocate_id();
        self.undo_stack
            .push_back(HistoryEntry::new(id, description, previous, inverse));
        self.redo_stack.clear();

        let evicted = evict_front(&mut self.undo_stack, self.max_stack_size);
        if evicted > 0 {
            tracing::debug!("Evicted {evicted} oldest history entries");
        }
    }

    /// Undoes the most recent change.
    ///
    /// Returns a copy of the restored state, or `None` if there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InverseAction`] if the entry's inverse action
    /// fails. The action runs after the stacks move, so by then the entry is
    /// on the redo stack and [`current_state`](Self::current_state) already
    /// holds the restored state.
    pub fn undo(&mut self) -> Result<Option<T>, HistoryError>
    where
        T: Clone,
    {
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        let (id, description, state, inverse) = entry.into_parts();

        // The redo entry reuses the popped id so that undo followed by redo
        // lands back on the same save point.
        let previous = std::mem::replace(&mut self.current, state);
        self.redo_stack
            .push_back(HistoryEntry::new(id, description.clone(), previous, None));
        evict_front(&mut self.redo_stack, self.max_stack_size);

        let restored = self.current.clone();
        if let Some(action) = inverse {
            action().map_err(|e| HistoryError::InverseAction {
                description,
                source: e.into(),
            })?;
        }
        Ok(Some(restored))
    }

    /// Redoes the most recently undone change.
    ///
    /// Returns a copy of the restored state, or `None` if there is nothing to
    /// redo. Never runs an inverse action, and the entry pushed back onto the
    /// undo stack carries none.
    pub fn redo(&mut self) -> Option<T>
    where
        T: Clone,
    {
        let entry = self.redo_stack.pop_back()?;
        let (id, description, state, _) = entry.into_parts();

        let previous = std::mem::replace(&mut self.current, state);
        self.undo_stack
            .push_back(HistoryEntry::new(id, description, previous, None));
        evict_front(&mut self.undo_stack, self.max_stack_size);

        Some(self.current.clone())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Label of the change the next undo reverts.
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.back().map(HistoryEntry::description)
    }

    /// Label of the change the next redo reapplies.
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.back().map(HistoryEntry::description)
    }

    /// The live state. Shared borrow only; changes go through `execute`.
    pub fn current_state(&self) -> &T {
        &self.current
    }

    /// Marks the current position as the last durably-saved state.
    pub fn mark_as_saved(&mut self) {
        self.saved_state_id = self.top_id();
    }

    /// Whether the history moved since the last save point.
    ///
    /// Identity comparison only; it does not diff states.
    pub fn has_unsaved_changes(&self) -> bool {
        self.top_id() != self.saved_state_id
    }

    /// Empties both stacks and forgets the save point. Keeps the current state.
    pub fn clear_history(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.saved_state_id = None;
    }

    pub fn max_stack_size(&self) -> usize {
        self.max_stack_size
    }

    pub fn saved_state_id(&self) -> Option<EntryId> {
        self.saved_state_id
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    /// Undo entries, oldest first.
    pub fn undo_entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.undo_stack.iter()
    }

    /// Redo entries, next-to-redo last.
    pub fn redo_entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.redo_stack.iter()
    }

    /// Copies the stacks and save point into their serializable form.
    pub fn snapshot(&self) -> HistorySnapshot<T>
    where
        T: Clone,
    {
        HistorySnapshot {
            undo_stack: self.undo_stack.iter().map(HistoryEntry::to_persistable).collect(),
            redo_stack: self.redo_stack.iter().map(HistoryEntry::to_persistable).collect(),
            saved_state_id: self.saved_state_id,
        }
    }

    /// Consumes the engine, returning the current state.
    pub fn into_state(self) -> T {
        self.current
    }

    fn top_id(&self) -> Option<EntryId> {
        self.undo_stack.back().map(HistoryEntry::id)
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

/// Removes entries from the front until `stack` fits `capacity`.
/// Returns how many were removed.
fn evict_front<E>(stack: &mut VecDeque<E>, capacity: usize) -> usize {
    let excess = stack.len().saturating_sub(capacity);
    stack.drain(..excess);
    excess
}
