//! # Crashlog Core
//!
//! Core record types, the store contract, and errors for the Crashlog stack.
//!
//! This crate provides the foundational abstractions that let the same
//! aggregation, retention, export and flush logic run against any storage
//! adapter (an embedded redb file in production, an in-memory map in tests).
//!
//! ## Key Traits
//!
//! - [`LogStore`]: Durable keyed storage for exception reports and events
//! - [`Record`]: Compile-time record kind, implemented by both record types
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`AppVersion`]: Four-component ordered application version
//! - [`ExceptionReport`] / [`EventRecord`]: The two persisted record kinds
//! - [`LogRecord`]: Closed union over both kinds
//! - [`StoredRecord`]: A record paired with its internal [`RecordId`]

pub mod clock;
pub mod error;
pub mod record;
pub mod store;
pub mod version;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::*;
pub use record::*;
pub use store::{LogStore, RecordPredicate};
pub use version::AppVersion;
