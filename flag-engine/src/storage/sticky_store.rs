use tracing::warn;

use crate::metrics::consts::{
    STICKY_STORAGE_ERRORS_COUNTER, STICKY_STORAGE_HIT_COUNTER, STICKY_STORAGE_WRITES_COUNTER,
};
use crate::metrics::utils::inc;
use crate::storage::{StickyRecord, StorageConnector};

/// Wraps a [`StorageConnector`] so that storage can never fail an evaluation:
/// read errors and invalid records become misses, rejected or failed writes
/// are logged and reported as `false`.
#[derive(Clone, Copy)]
pub struct StickyStore<'a> {
    connector: &'a dyn StorageConnector,
}

impl<'a> StickyStore<'a> {
    pub fn new(connector: &'a dyn StorageConnector) -> Self {
        StickyStore { connector }
    }

    pub fn get(&self, feature_key: &str, user_id: &str) -> Option<StickyRecord> {
        match self.connector.get(feature_key, user_id) {
            Ok(Some(record)) => match record.validate() {
                Ok(()) => {
                    inc(STICKY_STORAGE_HIT_COUNTER, &[], 1);
                    Some(record)
                }
                Err(err) => {
                    warn!(feature_key, user_id, error = %err, "ignoring invalid sticky record");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(
                    feature_key,
                    user_id,
                    error = %err,
                    "sticky storage read failed, treating as miss"
                );
                inc(
                    STICKY_STORAGE_ERRORS_COUNTER,
                    &[("operation".to_string(), "get".to_string())],
                    1,
                );
                None
            }
        }
    }

    pub fn set(&self, record: &StickyRecord) -> bool {
        if let Err(err) = record.validate() {
            warn!(
                feature_key = %record.feature_key,
                user_id = %record.user_id,
                error = %err,
                "refusing to persist invalid sticky record"
            );
            return false;
        }
        match self.connector.set(record) {
            Ok(()) => {
                inc(STICKY_STORAGE_WRITES_COUNTER, &[], 1);
                true
            }
            Err(err) => {
                warn!(
                    feature_key = %record.feature_key,
                    user_id = %record.user_id,
                    error = %err,
                    "sticky storage write failed"
                );
                inc(
                    STICKY_STORAGE_ERRORS_COUNTER,
                    &[("operation".to_string(), "set".to_string())],
                    1,
                );
                false
            }
        }
    }
}
