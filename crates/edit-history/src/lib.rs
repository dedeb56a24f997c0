/// Undo/redo history with durable, asynchronous persistence.
///
/// Provides a synchronous `HistoryEngine` that keeps capacity-bounded undo
/// and redo stacks of state snapshots, and a `HistoryStore` that persists
/// those stacks per context in an embedded key-value store (redb) on disk.
/// `DurableHistory` ties the two together through a latest-wins write queue
/// so persistence never blocks the edit path.
pub mod config;
pub mod engine;
pub mod entry;
pub mod session;
pub mod store;
pub mod writer;

pub use config::{HistoryConfig, StoreConfig};
pub use engine::{HistoryEngine, HistoryError};
pub use entry::{
    record_id, EntryId, HistoryEntry, HistorySnapshot, InverseAction, PersistableEntry,
    PersistedHistory,
};
pub use session::DurableHistory;
pub use store::{HistoryStore, HistorySummary, StoreError, StoreStatistics, StoreStatus};
pub use writer::HistoryWriter;
