//! Command handlers for the CLI

pub mod config;
pub mod restore;
pub mod serve;
pub mod status;
pub mod sync;
