//! In-memory store used by tests and simulated runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::record::OffsetRecord;
use crate::StateStore;

/// Store that keeps the record in memory and counts saves.
///
/// Can be switched into a failing mode to exercise best-effort persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<OffsetRecord>>,
    saves: AtomicU64,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `record`.
    pub fn with_record(record: OffsetRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// Make subsequent loads and saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Acquire)
    }

    /// Return the currently held record.
    pub fn current(&self) -> Option<OffsetRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store set to fail".to_owned()));
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<OffsetRecord>, StoreError> {
        self.check_available()?;
        Ok(self.current().map(OffsetRecord::normalized))
    }

    fn save(&self, record: &OffsetRecord) -> Result<(), StoreError> {
        self.check_available()?;
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&OffsetRecord::now(30, true)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().offset_minutes, 30);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn failing_mode_rejects_operations() {
        let store = MemoryStore::with_record(OffsetRecord::now(1, true));
        store.set_failing(true);
        assert!(store.load().is_err());
        assert!(store.save(&OffsetRecord::now(2, true)).is_err());
        assert_eq!(store.save_count(), 0);

        store.set_failing(false);
        assert_eq!(store.load().unwrap().unwrap().offset_minutes, 1);
    }
}
