//! HTTP handlers, one module per area of the API

pub mod files;
pub mod records;
pub mod settings;
pub mod sync;
pub mod system;
