use std::collections::HashMap;
use std::sync::RwLock;

use crate::storage::{StickyRecord, StorageConnector, StorageError};

type StorageKey = (String, String);

/// Thread-safe in-process sticky storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<StorageKey, StickyRecord>>,
}

impl MemoryStorage {
    pub fn with_records(records: impl IntoIterator<Item = StickyRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|r| ((r.feature_key.clone(), r.user_id.clone()), r))
            .collect();
        MemoryStorage {
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageConnector for MemoryStorage {
    fn get(&self, feature_key: &str, user_id: &str) -> Result<Option<StickyRecord>, StorageError> {
        let records = self
            .records
            .read()
            .map_err(|_| StorageError("memory storage lock poisoned".to_string()))?;
        Ok(records
            .get(&(feature_key.to_string(), user_id.to_string()))
            .cloned())
    }

    fn set(&self, record: &StickyRecord) -> Result<(), StorageError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StorageError("memory storage lock poisoned".to_string()))?;
        records.insert(
            (record.feature_key.clone(), record.user_id.clone()),
            record.clone(),
        );
        Ok(())
    }
}

/// Stores nothing; every read is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStorage;

impl StorageConnector for NoStorage {
    fn get(
        &self,
        _feature_key: &str,
        _user_id: &str,
    ) -> Result<Option<StickyRecord>, StorageError> {
        Ok(None)
    }

    fn set(&self, _record: &StickyRecord) -> Result<(), StorageError> {
        Ok(())
    }
}
