//! Persistence for the slave clock controller.
//!
//! The controller never reads the physical dial, so the only state worth
//! keeping across restarts is the relationship between system time and the
//! dial: the offset in minutes and whether it has ever been set. This crate
//! stores that single record.
//!
//! # Modules
//!
//! - [`record`] -- The persisted [`OffsetRecord`].
//! - [`json_file`] -- [`JsonFileStore`], the on-disk JSON store.
//! - [`memory`] -- [`MemoryStore`], an in-memory store for tests and dry runs.
//! - [`error`] -- Shared error types.
//!
//! Writes are best-effort from the caller's point of view: a failed save is
//! reported through [`StoreError`] and the caller keeps running on its
//! in-memory state.

pub mod error;
pub mod json_file;
pub mod memory;
pub mod record;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use record::OffsetRecord;

/// A place the offset record can be loaded from and saved to.
///
/// Implementations must be cheap to call from the daemon loop and from the
/// control surface; both share one store behind an `Arc`.
pub trait StateStore: Send + Sync {
    /// Load the last saved record.
    ///
    /// Returns `Ok(None)` when nothing has been saved yet. Absence is not an
    /// error.
    fn load(&self) -> Result<Option<OffsetRecord>, StoreError>;

    /// Replace the saved record.
    fn save(&self, record: &OffsetRecord) -> Result<(), StoreError>;
}
