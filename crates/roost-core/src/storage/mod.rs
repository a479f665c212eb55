//! Storage layer
//!
//! One JSON file per logical table in the data directory.
//!
//! ## Architecture
//!
//! - **Table files**: source of truth, rewritten whole on every change
//! - **Cloud mirror**: optional replica fed from the store's write events
//!
//! The store never waits on the mirror. Writes publish a [`MirrorEvent`]
//! and return as soon as the file is replaced.
//!
//! [`MirrorEvent`]: crate::mirror::MirrorEvent

pub mod error;
pub mod persistence;
pub mod record;
pub mod store;
pub mod table;

pub use error::{FieldError, StorageError, StorageResult};
pub use persistence::TablePersistence;
pub use record::{generate_id, timestamp, Record};
pub use store::{BootReport, FileStore, StoreStats};
pub use table::Table;
