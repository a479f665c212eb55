//! Cloud mirror
//!
//! Best-effort replication of local table writes to a hosted backend.
//!
//! ## Lifecycle
//!
//! `Uninitialized -> Probing -> Mirrored | LocalOnly`
//!
//! [`CloudMirror::connect`] runs a single probe. A relation that has not been
//! provisioned yet drops the mirror to local-only silently; any other failure
//! does the same with one warning for the lifetime of the process.
//!
//! ## Delivery
//!
//! Writes are queued in memory and flushed on a timer, or immediately once
//! the queue grows past [`MAX_QUEUE_LEN`]. A failed batch goes back on the
//! queue, so delivery is at-least-once and relies on upserts being
//! idempotent by id. Nothing here ever fails a local write.

mod backend;
mod memory;
mod merge;
mod supabase;
mod worker;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::storage::{Record, Table};

pub use backend::{CloudBackend, RemoteError, RemoteResult};
pub use memory::MemoryBackend;
pub use merge::merge_by_id;
pub use supabase::SupabaseBackend;
pub use worker::{
    reconcile_all, spawn_mirror_worker, MirrorControl, MirrorEvent, MirrorHandle, ReconcileReport,
    WorkerConfig,
};

/// Queue length above which a flush happens immediately
pub const MAX_QUEUE_LEN: usize = 50;

/// Maximum rows sent in one upsert request
pub const MAX_BATCH_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorState {
    Uninitialized,
    Probing,
    Mirrored,
    LocalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Upsert,
    Delete,
}

/// A write waiting to be replicated
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEntry {
    pub table: Table,
    pub record: Record,
    pub operation: SyncOperation,
}

/// Outcome of one queue flush
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub upserted: usize,
    pub deleted: usize,
    /// Entries put back on the queue after a failed request
    pub requeued: usize,
}

pub struct CloudMirror {
    backend: Option<Arc<dyn CloudBackend>>,
    state: watch::Sender<MirrorState>,
    queue: Mutex<Vec<SyncEntry>>,
    warned: AtomicBool,
}

impl CloudMirror {
    /// Create an unprobed mirror; without a backend it can only go local-only
    pub fn new(backend: Option<Arc<dyn CloudBackend>>) -> Self {
        let (state, _) = watch::channel(MirrorState::Uninitialized);
        Self {
            backend,
            state,
            queue: Mutex::new(Vec::new()),
            warned: AtomicBool::new(false),
        }
    }

    /// A mirror that never replicates
    pub fn local_only() -> Self {
        let mirror = Self::new(None);
        mirror.state.send_replace(MirrorState::LocalOnly);
        mirror
    }

    /// Create the mirror and run the startup probe
    pub async fn connect(backend: Option<Arc<dyn CloudBackend>>) -> Self {
        let mirror = Self::new(backend);
        mirror.probe().await;
        mirror
    }

    /// Probe the backend and settle on `Mirrored` or `LocalOnly`
    pub async fn probe(&self) -> MirrorState {
        let Some(backend) = self.backend.clone() else {
            debug!("no cloud backend configured, running local-only");
            return self.set_state(MirrorState::LocalOnly);
        };

        self.set_state(MirrorState::Probing);
        match backend.probe().await {
            Ok(()) => {
                info!(backend = backend.name(), "cloud mirror connected");
                self.set_state(MirrorState::Mirrored)
            }
            Err(e) if e.is_relation_missing() => {
                debug!(backend = backend.name(), error = %e, "remote tables not provisioned, running local-only");
                self.set_state(MirrorState::LocalOnly)
            }
            Err(e) => {
                self.warn_once("cloud mirror unavailable, running local-only", &e);
                self.set_state(MirrorState::LocalOnly)
            }
        }
    }

    pub fn state(&self) -> MirrorState {
        *self.state.borrow()
    }

    pub fn is_mirrored(&self) -> bool {
        self.state() == MirrorState::Mirrored
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.state.subscribe()
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Queue a write for replication
    ///
    /// Dropped when the mirror is local-only or the table is not mirrored.
    /// Returns the flush report when the queue crossed [`MAX_QUEUE_LEN`] and
    /// was flushed on the spot.
    pub async fn queue_sync(
        &self,
        table: Table,
        record: Record,
        operation: SyncOperation,
    ) -> Option<FlushReport> {
        if !self.is_mirrored() || !table.is_mirrored() {
            return None;
        }

        let len = {
            let mut queue = self.queue.lock().await;
            queue.push(SyncEntry {
                table,
                record,
                operation,
            });
            queue.len()
        };

        if len > MAX_QUEUE_LEN {
            debug!(len, "sync queue over threshold, flushing now");
            return Some(self.flush().await);
        }
        None
    }

    /// Send everything queued so far
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();
        let Some(backend) = self.backend.clone() else {
            return report;
        };

        let entries = std::mem::take(&mut *self.queue.lock().await);
        if entries.is_empty() {
            return report;
        }

        let mut failed: Vec<SyncEntry> = Vec::new();
        for (table, batch) in collapse(entries) {
            let (upserts, deletes): (Vec<SyncEntry>, Vec<SyncEntry>) = batch
                .into_iter()
                .partition(|e| e.operation == SyncOperation::Upsert);

            for chunk in upserts.chunks(MAX_BATCH_ROWS) {
                let rows: Vec<Record> = chunk.iter().map(|e| e.record.clone()).collect();
                match backend.upsert(table, &rows).await {
                    Ok(()) => report.upserted += rows.len(),
                    Err(e) => {
                        self.warn_once("cloud mirror flush failed", &e);
                        failed.extend_from_slice(chunk);
                    }
                }
            }

            for chunk in deletes.chunks(MAX_BATCH_ROWS) {
                let ids: Vec<String> = chunk.iter().filter_map(|e| e.record.id()).collect();
                match backend.delete(table, &ids).await {
                    Ok(()) => report.deleted += ids.len(),
                    Err(e) => {
                        self.warn_once("cloud mirror flush failed", &e);
                        failed.extend_from_slice(chunk);
                    }
                }
            }
        }

        if !failed.is_empty() {
            report.requeued = failed.len();
            let mut queue = self.queue.lock().await;
            // Failed entries go ahead of anything queued during the flush
            failed.append(&mut queue);
            *queue = failed;
        }

        debug!(
            upserted = report.upserted,
            deleted = report.deleted,
            requeued = report.requeued,
            "sync queue flushed"
        );
        report
    }

    /// Reconcile one table: merge remote and local by id, push the result
    ///
    /// Returns the number of rows pushed.
    pub async fn sync_table(&self, table: Table, local: Vec<Record>) -> RemoteResult<usize> {
        let backend = self.connected_backend()?;

        let remote = backend.fetch_all(table).await?;
        let merged = merge_by_id(remote, local);

        for chunk in merged.chunks(MAX_BATCH_ROWS) {
            backend.upsert(table, chunk).await?;
        }

        debug!(table = %table, rows = merged.len(), "table reconciled");
        Ok(merged.len())
    }

    /// Remote copy of `table` for boot-time restore
    ///
    /// `None` when local-only, on any error, or when the remote is empty.
    pub async fn load_from_cloud(&self, table: Table) -> Option<Vec<Record>> {
        let backend = self.connected_backend().ok()?;
        match backend.fetch_all(table).await {
            Ok(rows) if !rows.is_empty() => Some(rows),
            Ok(_) => None,
            Err(e) if e.is_relation_missing() => None,
            Err(e) => {
                self.warn_once("could not load table from cloud", &e);
                None
            }
        }
    }

    fn connected_backend(&self) -> RemoteResult<Arc<dyn CloudBackend>> {
        match (&self.backend, self.is_mirrored()) {
            (Some(backend), true) => Ok(backend.clone()),
            _ => Err(RemoteError::NotConnected),
        }
    }

    fn set_state(&self, state: MirrorState) -> MirrorState {
        self.state.send_replace(state);
        state
    }

    /// Log connectivity trouble once per process, then only at debug level
    fn warn_once(&self, context: &str, error: &RemoteError) {
        if self.warned.swap(true, Ordering::SeqCst) {
            debug!(error = %error, "{}", context);
        } else {
            warn!(error = %error, "{}", context);
        }
    }

    #[cfg(test)]
    fn has_warned(&self) -> bool {
        self.warned.load(Ordering::SeqCst)
    }
}

/// Group entries per table, keeping only the latest entry for each id
///
/// A replaced entry keeps the position of the first one queued for its id.
fn collapse(entries: Vec<SyncEntry>) -> BTreeMap<Table, Vec<SyncEntry>> {
    let mut grouped: BTreeMap<Table, Vec<SyncEntry>> = BTreeMap::new();
    let mut positions: HashMap<(Table, String), usize> = HashMap::new();
    for entry in entries {
        let Some(id) = entry.record.id() else {
            debug!(table = %entry.table, "dropping sync entry without id");
            continue;
        };
        let batch = grouped.entry(entry.table).or_default();
        match positions.entry((entry.table, id)) {
            Entry::Occupied(pos) => batch[*pos.get()] = entry,
            Entry::Vacant(slot) => {
                slot.insert(batch.len());
                batch.push(entry);
            }
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    async fn mirrored(backend: Arc<MemoryBackend>) -> CloudMirror {
        let mirror = CloudMirror::connect(Some(backend)).await;
        assert_eq!(mirror.state(), MirrorState::Mirrored);
        mirror
    }

    #[tokio::test]
    async fn test_no_backend_is_local_only() {
        let mirror = CloudMirror::connect(None).await;
        assert_eq!(mirror.state(), MirrorState::LocalOnly);
        assert!(mirror.load_from_cloud(Table::Users).await.is_none());
        assert!(!mirror.has_warned());
    }

    #[tokio::test]
    async fn test_missing_relation_is_silent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.mark_missing(Table::Users);

        let mirror = CloudMirror::connect(Some(backend)).await;
        assert_eq!(mirror.state(), MirrorState::LocalOnly);
        assert!(!mirror.has_warned());
    }

    #[tokio::test]
    async fn test_unreachable_backend_warns_once() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_failing(true);

        let mirror = CloudMirror::new(Some(backend));
        assert_eq!(mirror.state(), MirrorState::Uninitialized);
        assert_eq!(mirror.probe().await, MirrorState::LocalOnly);
        assert!(mirror.has_warned());
    }

    #[tokio::test]
    async fn test_local_only_drops_entries() {
        let mirror = CloudMirror::local_only();
        let flushed = mirror
            .queue_sync(Table::Pigeons, rec(json!({"id": "a"})), SyncOperation::Upsert)
            .await;
        assert!(flushed.is_none());
        assert_eq!(mirror.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_unmirrored_tables_are_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirrored(backend).await;
        mirror
            .queue_sync(Table::Settings, rec(json!({"id": "s"})), SyncOperation::Upsert)
            .await;
        assert_eq!(mirror.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_queue_flushes_past_threshold() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirrored(backend.clone()).await;

        for i in 0..MAX_QUEUE_LEN {
            let flushed = mirror
                .queue_sync(Table::Logs, rec(json!({"id": i})), SyncOperation::Upsert)
                .await;
            assert!(flushed.is_none());
        }
        assert_eq!(mirror.queue_len().await, 50);
        assert!(backend.rows(Table::Logs).is_empty());

        let report = mirror
            .queue_sync(Table::Logs, rec(json!({"id": 50})), SyncOperation::Upsert)
            .await
            .expect("51st entry flushes");
        assert_eq!(report.upserted, 51);
        assert_eq!(mirror.queue_len().await, 0);
        assert_eq!(backend.rows(Table::Logs).len(), 51);
    }

    #[tokio::test]
    async fn test_flush_applies_latest_operation_per_id() {
        let backend = Arc::new(
            MemoryBackend::new().with_rows(Table::Tokens, vec![rec(json!({"id": "old"}))]),
        );
        let mirror = mirrored(backend.clone()).await;

        mirror
            .queue_sync(Table::Tokens, rec(json!({"id": "t1", "v": 1})), SyncOperation::Upsert)
            .await;
        mirror
            .queue_sync(Table::Tokens, rec(json!({"id": "t1", "v": 2})), SyncOperation::Upsert)
            .await;
        mirror
            .queue_sync(Table::Tokens, rec(json!({"id": "old"})), SyncOperation::Delete)
            .await;

        let report = mirror.flush().await;
        assert_eq!(report, FlushReport { upserted: 1, deleted: 1, requeued: 0 });
        assert_eq!(backend.rows(Table::Tokens), vec![rec(json!({"id": "t1", "v": 2}))]);
    }

    #[test]
    fn test_collapse_keeps_latest_per_table_and_id() {
        let entry = |table, value, operation| SyncEntry {
            table,
            record: rec(value),
            operation,
        };
        let mut entries: Vec<SyncEntry> = (0..5000)
            .map(|i| entry(Table::Logs, json!({"id": i % 2000, "n": i}), SyncOperation::Upsert))
            .collect();
        entries.push(entry(Table::Races, json!({"id": 7}), SyncOperation::Upsert));
        entries.push(entry(Table::Races, json!({"id": 7}), SyncOperation::Delete));
        entries.push(entry(Table::Races, json!({"v": "no id"}), SyncOperation::Upsert));

        let grouped = collapse(entries);

        let logs = &grouped[&Table::Logs];
        assert_eq!(logs.len(), 2000);
        assert_eq!(logs[0].record.id().as_deref(), Some("0"));
        assert_eq!(logs[0].record.get("n"), Some(&json!(4000)));
        assert_eq!(logs[1999].record.get("n"), Some(&json!(3999)));

        let races = &grouped[&Table::Races];
        assert_eq!(races.len(), 1);
        assert_eq!(races[0].operation, SyncOperation::Delete);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirrored(backend.clone()).await;

        mirror
            .queue_sync(Table::Races, rec(json!({"id": "r1"})), SyncOperation::Upsert)
            .await;
        backend.set_failing(true);

        let report = mirror.flush().await;
        assert_eq!(report.requeued, 1);
        assert_eq!(mirror.queue_len().await, 1);
        assert!(mirror.has_warned());

        backend.set_failing(false);
        let report = mirror.flush().await;
        assert_eq!(report.upserted, 1);
        assert_eq!(mirror.queue_len().await, 0);
        assert_eq!(backend.rows(Table::Races).len(), 1);
    }

    #[tokio::test]
    async fn test_sync_table_merges_local_over_remote() {
        let backend = Arc::new(
            MemoryBackend::new().with_rows(Table::Pigeons, vec![rec(json!({"id": 1, "v": "a"}))]),
        );
        let mirror = mirrored(backend.clone()).await;

        let local = vec![rec(json!({"id": 1, "v": "b"})), rec(json!({"id": 2, "v": "c"}))];
        let pushed = mirror.sync_table(Table::Pigeons, local).await.unwrap();

        assert_eq!(pushed, 2);
        assert_eq!(
            backend.rows(Table::Pigeons),
            vec![rec(json!({"id": 1, "v": "b"})), rec(json!({"id": 2, "v": "c"}))]
        );
    }

    #[tokio::test]
    async fn test_sync_table_batches_large_tables() {
        let backend = Arc::new(MemoryBackend::new());
        let mirror = mirrored(backend.clone()).await;

        let local: Vec<Record> = (0..2500).map(|i| rec(json!({"id": i}))).collect();
        mirror.sync_table(Table::UsageStats, local).await.unwrap();

        assert_eq!(backend.upsert_calls(), 3);
        assert_eq!(backend.rows(Table::UsageStats).len(), 2500);
    }

    #[tokio::test]
    async fn test_sync_table_requires_connection() {
        let mirror = CloudMirror::local_only();
        let err = mirror.sync_table(Table::Users, Vec::new()).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotConnected));
    }

    #[tokio::test]
    async fn test_load_from_cloud() {
        let backend = Arc::new(
            MemoryBackend::new().with_rows(Table::Users, vec![rec(json!({"id": "u1"}))]),
        );
        let mirror = mirrored(backend).await;

        assert_eq!(mirror.load_from_cloud(Table::Users).await.unwrap().len(), 1);
        assert!(mirror.load_from_cloud(Table::Races).await.is_none());
    }
}
