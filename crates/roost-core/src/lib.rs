//! Roost Core Library
//!
//! This crate provides the core functionality for Roost, a loft manager for
//! racing pigeon fanciers: pigeons, training tosses, races, breeding and
//! health records.
//!
//! # Architecture
//!
//! - **Table files**: one JSON file per table in the data directory, the
//!   source of truth
//! - **Cloud mirror**: optional best-effort replica on a hosted PostgREST
//!   backend, fed by a background worker
//! - **Blob store**: attachments on the first working object-storage
//!   provider
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let (store, events) = FileStore::mirrored(&config.data_dir);
//! let mirror = Arc::new(CloudMirror::connect(backend).await);
//! store.boot(&mirror).await?;
//! let worker = spawn_mirror_worker(mirror.clone(), store.clone(), events, (&config.sync).into());
//!
//! let pigeon = store.insert(&Pigeon::new("NL-2024-1234567")).await?;
//! ```
//!
//! # Modules
//!
//! - `storage`: table files and the `FileStore` (main entry point)
//! - `mirror`: cloud mirror, backends and the background worker
//! - `blob`: multi-provider attachment storage
//! - `models`: typed records with validation
//! - `config`: application configuration

pub mod blob;
pub mod config;
pub mod mirror;
pub mod models;
pub mod storage;

pub use blob::{BlobContent, BlobError, BlobStore, UploadedFile};
pub use config::{Config, Environment};
pub use mirror::{
    spawn_mirror_worker, CloudBackend, CloudMirror, MirrorControl, MirrorEvent, MirrorHandle,
    MirrorState, RemoteError, SupabaseBackend,
};
pub use models::{
    BreedingRecord, Entity, EventItem, HealthRecord, NewsItem, Pigeon, RaceRecord, TrainingRecord,
    User,
};
pub use storage::{FieldError, FileStore, Record, StorageError, Table};
