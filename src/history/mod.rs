//! Block history: forward/reverse diff layers and root indexing.

pub mod diff;
pub mod history_store;

pub use diff::{DiffCodecError, DiffLayer};
pub use history_store::{HistoryError, HistoryStore, RootEntry, StateRootIndex};
