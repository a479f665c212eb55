//! Background mirror worker
//!
//! Consumes write events published by the file store and feeds them to the
//! mirror queue. Also owns the two timers: a queue flush and a full
//! reconciliation of every mirrored table.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CloudMirror, FlushReport, SyncOperation};
use crate::config::SyncConfig;
use crate::storage::{FileStore, Record, Table};

/// A local write the mirror should know about
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// A record was added or updated
    Upsert { table: Table, record: Record },
    /// A record was removed
    Delete { table: Table, id: String },
    /// The whole table was rewritten
    Replace { table: Table, records: Vec<Record> },
}

/// Commands sent to the worker
#[derive(Debug)]
enum MirrorCommand {
    /// Queue pending events and flush now
    Flush(oneshot::Sender<FlushReport>),
    /// Reconcile every mirrored table now
    Reconcile(oneshot::Sender<ReconcileReport>),
    /// Drain pending events, flush, and stop
    Shutdown,
}

/// Timer settings for the worker
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub flush_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(300),
        }
    }
}

impl From<&SyncConfig> for WorkerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs.max(1)),
        }
    }
}

/// Result of reconciling every mirrored table
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReconcileReport {
    pub tables: usize,
    pub rows: usize,
    pub failed: Vec<String>,
}

/// Cloneable way to ask a running worker for work
///
/// Replies are `None` once the worker has stopped.
#[derive(Debug, Clone)]
pub struct MirrorControl {
    command_tx: mpsc::Sender<MirrorCommand>,
}

impl MirrorControl {
    pub async fn flush(&self) -> Option<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.command_tx.send(MirrorCommand::Flush(reply)).await.ok()?;
        rx.await.ok()
    }

    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(MirrorCommand::Reconcile(reply))
            .await
            .ok()?;
        rx.await.ok()
    }
}

/// Handle owning the mirror worker task
pub struct MirrorHandle {
    control: MirrorControl,
    task: JoinHandle<()>,
}

impl MirrorHandle {
    pub fn control(&self) -> MirrorControl {
        self.control.clone()
    }

    pub async fn flush(&self) -> Option<FlushReport> {
        self.control.flush().await
    }

    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        self.control.reconcile().await
    }

    /// Stop the worker after a final flush
    pub async fn shutdown(self) {
        let _ = self.control.command_tx.send(MirrorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "mirror worker ended abnormally");
        }
    }
}

/// Spawn the worker on the current runtime
pub fn spawn_mirror_worker(
    mirror: Arc<CloudMirror>,
    store: FileStore,
    events_rx: mpsc::UnboundedReceiver<MirrorEvent>,
    config: WorkerConfig,
) -> MirrorHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(worker_loop(mirror, store, events_rx, command_rx, config));
    MirrorHandle {
        control: MirrorControl { command_tx },
        task,
    }
}

async fn worker_loop(
    mirror: Arc<CloudMirror>,
    store: FileStore,
    mut events_rx: mpsc::UnboundedReceiver<MirrorEvent>,
    mut command_rx: mpsc::Receiver<MirrorCommand>,
    config: WorkerConfig,
) {
    // Both timers wait a full period before their first tick
    let mut flush_timer = interval_at(
        Instant::now() + config.flush_interval,
        config.flush_interval,
    );
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reconcile_timer = interval_at(
        Instant::now() + config.reconcile_interval,
        config.reconcile_interval,
    );
    reconcile_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut events_open = true;
    debug!(
        flush_secs = config.flush_interval.as_secs(),
        reconcile_secs = config.reconcile_interval.as_secs(),
        "mirror worker started"
    );

    loop {
        tokio::select! {
            event = events_rx.recv(), if events_open => {
                match event {
                    Some(event) => handle_event(&mirror, event).await,
                    None => events_open = false,
                }
            }
            _ = flush_timer.tick() => {
                mirror.flush().await;
            }
            _ = reconcile_timer.tick() => {
                reconcile_all(&mirror, &store).await;
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(MirrorCommand::Flush(reply)) => {
                        if events_open {
                            drain_events(&mirror, &mut events_rx).await;
                        }
                        let _ = reply.send(mirror.flush().await);
                    }
                    Some(MirrorCommand::Reconcile(reply)) => {
                        let _ = reply.send(reconcile_all(&mirror, &store).await);
                    }
                    Some(MirrorCommand::Shutdown) | None => break,
                }
            }
        }
    }

    drain_events(&mirror, &mut events_rx).await;
    let report = mirror.flush().await;
    debug!(upserted = report.upserted, requeued = report.requeued, "mirror worker stopped");
}

/// Queue every event already published
async fn drain_events(mirror: &CloudMirror, events_rx: &mut mpsc::UnboundedReceiver<MirrorEvent>) {
    while let Ok(event) = events_rx.try_recv() {
        handle_event(mirror, event).await;
    }
}

async fn handle_event(mirror: &CloudMirror, event: MirrorEvent) {
    match event {
        MirrorEvent::Upsert { table, record } => {
            mirror.queue_sync(table, record, SyncOperation::Upsert).await;
        }
        MirrorEvent::Delete { table, id } => {
            let mut record = Record::new();
            record.set_id(id);
            mirror.queue_sync(table, record, SyncOperation::Delete).await;
        }
        MirrorEvent::Replace { table, records } => {
            for record in records {
                mirror.queue_sync(table, record, SyncOperation::Upsert).await;
            }
        }
    }
}

/// Reconcile every mirrored table against its local copy
///
/// A table that fails is logged and skipped; the others still run.
pub async fn reconcile_all(mirror: &CloudMirror, store: &FileStore) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    if !mirror.is_mirrored() {
        return report;
    }

    for table in Table::mirrored() {
        let local = match store.read(table).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(table = %table, error = %e, "could not read table for reconciliation");
                report.failed.push(table.name().to_string());
                continue;
            }
        };

        match mirror.sync_table(table, local).await {
            Ok(rows) => {
                report.tables += 1;
                report.rows += rows;
            }
            Err(e) => {
                debug!(table = %table, error = %e, "reconciliation failed");
                report.failed.push(table.name().to_string());
            }
        }
    }

    info!(
        tables = report.tables,
        rows = report.rows,
        failed = report.failed.len(),
        "reconciliation finished"
    );
    report
}
