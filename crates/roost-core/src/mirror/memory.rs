//! In-process backend.
//!
//! Keeps rows in memory. Used for offline runs and to exercise the mirror
//! without a network; failure and missing-relation modes can be switched on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::backend::{CloudBackend, RemoteError, RemoteResult};
use super::merge::merge_by_id;
use crate::storage::{Record, Table};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<Table, Vec<Record>>>,
    missing: Mutex<HashSet<Table>>,
    failing: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with rows
    pub fn with_rows(self, table: Table, rows: Vec<Record>) -> Self {
        self.lock_tables().insert(table, rows);
        self
    }

    /// Make every call fail as if the network were down
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Pretend `table` has not been provisioned
    pub fn mark_missing(&self, table: Table) {
        self.missing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table);
    }

    /// Snapshot of the rows held for `table`
    pub fn rows(&self, table: Table) -> Vec<Record> {
        self.lock_tables().get(&table).cloned().unwrap_or_default()
    }

    /// Number of upsert requests received
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<Table, Vec<Record>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, table: Table) -> RemoteResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        let missing = self.missing.lock().unwrap_or_else(|e| e.into_inner());
        if missing.contains(&table) {
            return Err(RemoteError::RelationMissing(table.name().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn probe(&self) -> RemoteResult<()> {
        self.check(Table::Users)
    }

    async fn fetch_all(&self, table: Table) -> RemoteResult<Vec<Record>> {
        self.check(table)?;
        Ok(self.rows(table))
    }

    async fn upsert(&self, table: Table, rows: &[Record]) -> RemoteResult<()> {
        self.check(table)?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.lock_tables();
        let existing = tables.remove(&table).unwrap_or_default();
        tables.insert(table, merge_by_id(existing, rows.to_vec()));
        Ok(())
    }

    async fn delete(&self, table: Table, ids: &[String]) -> RemoteResult<()> {
        self.check(table)?;
        let mut tables = self.lock_tables();
        if let Some(rows) = tables.get_mut(&table) {
            rows.retain(|r| r.id().map_or(true, |id| !ids.contains(&id)));
        }
        Ok(())
    }
}
