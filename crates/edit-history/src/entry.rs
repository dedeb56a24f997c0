/// History entry types and their persistable projections.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Side-effecting callback run when its entry is undone.
///
/// Never serialized. Entries restored from the store never carry one.
pub type InverseAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Identity of a history entry.
///
/// Allocated from a per-engine counter, so later entries compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A snapshot of document state plus metadata, held on an engine stack.
pub struct HistoryEntry<T> {
    id: EntryId,
    timestamp: DateTime<Utc>,
    description: String,
    state: T,
    inverse_action: Option<InverseAction>,
}

impl<T: fmt::Debug> fmt::Debug for HistoryEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("description", &self.description)
            .field("state", &self.state)
            .field("has_inverse_action", &self.inverse_action.is_some())
            .finish()
    }
}

impl<T> HistoryEntry<T> {
    pub(crate) fn new(
        id: EntryId,
        description: String,
        state: T,
        inverse_action: Option<InverseAction>,
    ) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            description,
            state,
            inverse_action,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The document state this entry returns to.
    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn has_inverse_action(&self) -> bool {
        self.inverse_action.is_some()
    }

    /// Splits the entry into its owned parts.
    pub(crate) fn into_parts(self) -> (EntryId, String, T, Option<InverseAction>) {
        (self.id, self.description, self.state, self.inverse_action)
    }

    /// Copies the entry into its serializable form, dropping the inverse action.
    pub fn to_persistable(&self) -> PersistableEntry<T>
    where
        T: Clone,
    {
        PersistableEntry {
            id: self.id,
            timestamp: self.timestamp,
            description: self.description.clone(),
            state: self.state.clone(),
        }
    }
}

/// A history entry as it crosses the durability boundary.
///
/// Has no slot for an inverse action, so erasure happens by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistableEntry<T> {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub state: T,
}

impl<T> From<PersistableEntry<T>> for HistoryEntry<T> {
    fn from(entry: PersistableEntry<T>) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
            description: entry.description,
            state: entry.state,
            inverse_action: None,
        }
    }
}

/// Serializable projection of an engine's stacks and save point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot<T> {
    pub undo_stack: Vec<PersistableEntry<T>>,
    pub redo_stack: Vec<PersistableEntry<T>>,
    pub saved_state_id: Option<EntryId>,
}

impl<T> HistorySnapshot<T> {
    /// Snapshot with both stacks empty and no save point.
    pub fn empty() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            saved_state_id: None,
        }
    }
}

/// A stored history record for one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedHistory<T> {
    /// Derived from `context_id`; see [`record_id`].
    pub id: Uuid,
    pub context_id: String,
    pub undo_stack: Vec<PersistableEntry<T>>,
    pub redo_stack: Vec<PersistableEntry<T>>,
    pub saved_state_id: Option<EntryId>,
    pub last_modified: DateTime<Utc>,
}

impl<T> PersistedHistory<T> {
    /// Drops record metadata, keeping the stacks and save point.
    pub fn into_snapshot(self) -> HistorySnapshot<T> {
        HistorySnapshot {
            undo_stack: self.undo_stack,
            redo_stack: self.redo_stack,
            saved_state_id: self.saved_state_id,
        }
    }
}

/// Namespace for record ids.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_08c2_4b7e_4f0a_9a53_2c1e_7d44_b019);

/// Derives the stable record id for a context.
///
/// Uses a name-based UUID so the id is identical across processes and builds.
pub fn record_id(context_id: &str) -> Uuid {
    Uuid::new_v5(&RECORD_NAMESPACE, context_id.as_bytes())
}
