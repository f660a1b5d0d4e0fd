pub mod entry;
pub mod history;
pub mod listener;
pub mod registry;
pub mod settings;
mod state;
pub mod transaction;

pub use entry::{Entry, EntryId};
pub use history::SessionHistory;
pub use listener::{EvictionReason, HistoryEvent, HistoryId, HistoryListener};
pub use registry::{HistoryRegistry, MemoryPressure};
pub use settings::HistorySettings;
pub use transaction::TransactionList;
