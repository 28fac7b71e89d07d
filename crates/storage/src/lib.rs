pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{FieldKey, HistoryKind, HistoryRecord, ScheduledRecord, StateRecord};
pub use traits::TransitionStorage;
