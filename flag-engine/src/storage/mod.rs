pub mod memory;
pub mod sticky_record;
pub mod sticky_store;

use thiserror::Error;

pub use memory::{MemoryStorage, NoStorage};
pub use sticky_record::StickyRecord;
pub use sticky_store::StickyStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StorageError(pub String);

/// Persists sticky decisions keyed by `(feature_key, user_id)`.
///
/// Calls are synchronous and may race; the last write for a key wins.
pub trait StorageConnector: Send + Sync {
    fn get(&self, feature_key: &str, user_id: &str) -> Result<Option<StickyRecord>, StorageError>;
    fn set(&self, record: &StickyRecord) -> Result<(), StorageError>;
}
