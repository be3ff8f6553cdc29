//! # Crashlog Storage
//!
//! [`LogStore`] adapters for Crashlog.
//!
//! ## Features
//!
//! - **RedbLogStore**: Embedded redb database file for production use
//! - **InMemoryLogStore**: Map-backed implementation for testing and ephemeral logs
//!
//! Both adapters run each mutating call as a single transaction and expose
//! an explicit compaction step, which the engine invokes after deletions.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crashlog_core::{AppVersion, EventRecord, LogStore, Priority, RecordKind};
//! use crashlog_storage::{RedbLogStore, RedbLogStoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedbLogStore::open(RedbLogStoreConfig::with_path("./crashlog.redb")).unwrap();
//!
//!     let event = EventRecord::new(Priority::Info, "started", chrono::Utc::now(), AppVersion::new(1, 0, 0, 0));
//!     store.insert(event.into()).await.unwrap();
//!
//!     let events = store.scan_all(RecordKind::Event).await.unwrap();
//!     assert_eq!(events.len(), 1);
//! }
//! ```

pub mod memory;
pub mod redb_store;

// Re-exports
pub use memory::InMemoryLogStore;
pub use redb_store::{RedbLogStore, RedbLogStoreConfig};

// Re-export the store contract for convenience
pub use crashlog_core::{LogStore, StorageError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the LogStore trait is object-safe
    fn _assert_object_safe(_: &dyn LogStore) {}

    #[test]
    fn test_adapters_coerce_to_trait_objects() {
        let store = InMemoryLogStore::new();
        _assert_object_safe(&store);
    }
}
