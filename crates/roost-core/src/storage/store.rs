//! Local file store
//!
//! The `FileStore` is the single entry point for table reads and writes.
//!
//! ## Write path
//!
//! `add`, `update` and `delete` are read-modify-write cycles over the whole
//! table file. Each cycle holds that table's lock, so two concurrent updates
//! to the same table are applied one after the other instead of the later
//! rewrite silently discarding the earlier one.
//!
//! ## Usage
//!
//! ```ignore
//! let store = FileStore::new(config.data_dir.clone());
//!
//! let pigeon = store.insert(&Pigeon::new("GB-2024-00123")).await?;
//! let all: Vec<Pigeon> = store.list().await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::error::{FieldError, StorageError, StorageResult};
use super::persistence::TablePersistence;
use super::record::Record;
use super::table::Table;
use crate::mirror::{CloudMirror, MirrorEvent};
use crate::models::Entity;

/// Record counts per table
#[derive(Debug, Default, Clone, Serialize)]
pub struct StoreStats {
    pub tables: BTreeMap<Table, usize>,
    pub total: usize,
}

/// What the boot sequence did for each blank table
#[derive(Debug, Default, Clone, Serialize)]
pub struct BootReport {
    /// Tables hydrated from the cloud mirror
    pub restored: Vec<Table>,
    /// Tables initialised with their empty default
    pub defaulted: Vec<Table>,
}

struct Inner {
    persistence: TablePersistence,
    locks: HashMap<Table, Mutex<()>>,
    events: Option<mpsc::UnboundedSender<MirrorEvent>>,
}

/// Handle to the table files; cheap to clone
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// A store that does not publish write events
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::build(data_dir.into(), None)
    }

    /// A store publishing every write on the returned channel
    pub fn mirrored(
        data_dir: impl Into<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<MirrorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(data_dir.into(), Some(tx)), rx)
    }

    fn build(data_dir: PathBuf, events: Option<mpsc::UnboundedSender<MirrorEvent>>) -> Self {
        let locks = Table::ALL.into_iter().map(|t| (t, Mutex::new(()))).collect();
        Self {
            inner: Arc::new(Inner {
                persistence: TablePersistence::new(data_dir),
                locks,
                events,
            }),
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.inner.persistence.data_dir()
    }

    pub fn persistence(&self) -> &TablePersistence {
        &self.inner.persistence
    }

    // ==================== Untyped Operations ====================

    /// All records of `table`; a missing file reads as empty
    pub async fn read(&self, table: Table) -> StorageResult<Vec<Record>> {
        let value = self.inner.persistence.read_value(table).await?;
        self.decode(table, value)
    }

    /// Replace the whole table
    pub async fn write(&self, table: Table, records: Vec<Record>) -> StorageResult<()> {
        let _guard = self.lock(table).await;
        self.persist(table, &records).await?;
        if table.is_mirrored() {
            self.publish(MirrorEvent::Replace { table, records });
        }
        Ok(())
    }

    /// Append a record, filling in `id`, `createdAt` and `updatedAt` if absent
    pub async fn add(&self, table: Table, partial: Record) -> StorageResult<Record> {
        self.add_checked(table, partial, |_| Ok(())).await
    }

    /// Shallow-merge `patch` into the first record with `id`
    pub async fn update(
        &self,
        table: Table,
        id: &str,
        patch: &Map<String, Value>,
    ) -> StorageResult<Record> {
        self.update_checked(table, id, patch, |_| Ok(())).await
    }

    /// Remove the first record with `id`
    ///
    /// Always succeeds when the table can be written; an unknown id leaves
    /// the table as it was.
    pub async fn delete(&self, table: Table, id: &str) -> StorageResult<bool> {
        let _guard = self.lock(table).await;
        let mut records = self.read(table).await?;

        let removed = match records.iter().position(|r| r.has_id(id)) {
            Some(pos) => {
                records.remove(pos);
                true
            }
            None => false,
        };

        self.persist(table, &records).await?;
        if removed {
            debug!(table = %table, id, "record deleted");
            if table.is_mirrored() {
                self.publish(MirrorEvent::Delete {
                    table,
                    id: id.to_string(),
                });
            }
        }
        Ok(true)
    }

    /// First record with `id`
    pub async fn get(&self, table: Table, id: &str) -> StorageResult<Option<Record>> {
        Ok(self.read(table).await?.into_iter().find(|r| r.has_id(id)))
    }

    pub async fn count(&self, table: Table) -> StorageResult<usize> {
        if table.is_object() {
            return Ok(self.settings().await?.len());
        }
        Ok(self.read(table).await?.len())
    }

    /// Record counts for every table
    pub async fn stats(&self) -> StorageResult<StoreStats> {
        let mut stats = StoreStats::default();
        for table in Table::ALL {
            let count = self.count(table).await?;
            stats.total += count;
            stats.tables.insert(table, count);
        }
        Ok(stats)
    }

    // ==================== Settings ====================

    pub async fn settings(&self) -> StorageResult<Map<String, Value>> {
        match self.inner.persistence.read_value(Table::Settings).await? {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(self.invalid(Table::Settings, "expected a JSON object")),
        }
    }

    /// Replace the settings object
    pub async fn save_settings(&self, settings: Map<String, Value>) -> StorageResult<()> {
        let _guard = self.lock(Table::Settings).await;
        self.inner
            .persistence
            .write_value(Table::Settings, &Value::Object(settings))
            .await
    }

    // ==================== Typed Operations ====================

    /// Every record of `T`'s table that deserializes as `T`
    ///
    /// Rows of the wrong shape are skipped with a warning.
    pub async fn list<T: Entity>(&self) -> StorageResult<Vec<T>> {
        let records = self.read(T::TABLE).await?;
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<T>(record.into_value()) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!(table = %T::TABLE, error = %e, "skipping malformed record"),
            }
        }
        Ok(entities)
    }

    pub async fn get_entity<T: Entity>(&self, id: &str) -> StorageResult<Option<T>> {
        match self.get(T::TABLE, id).await? {
            Some(record) => to_entity(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Validate and append an entity
    pub async fn insert<T: Entity>(&self, entity: &T) -> StorageResult<T> {
        let record = Record::from_value(serde_json::to_value(entity)?)
            .ok_or_else(|| StorageError::Validation(vec![not_an_object()]))?;
        let stored = self
            .add_checked(T::TABLE, record, |r| validated::<T>(r).map(|_| ()))
            .await?;
        to_entity(&stored)
    }

    /// Merge `patch` into an entity and validate the result before writing
    pub async fn patch<T: Entity>(&self, id: &str, patch: &Map<String, Value>) -> StorageResult<T> {
        let stored = self
            .update_checked(T::TABLE, id, patch, |r| validated::<T>(r).map(|_| ()))
            .await?;
        to_entity(&stored)
    }

    /// Validate a raw record as `T` and append it
    pub async fn insert_record<T: Entity>(&self, partial: Record) -> StorageResult<T> {
        let stored = self
            .add_checked(T::TABLE, partial, |r| validated::<T>(r).map(|_| ()))
            .await?;
        to_entity(&stored)
    }

    // ==================== Boot ====================

    /// Make sure every table file holds something
    ///
    /// Blank tables (missing, empty, `[]` or `{}`) are restored from the
    /// mirror when it has rows; otherwise they get their default value.
    pub async fn boot(&self, mirror: &CloudMirror) -> StorageResult<BootReport> {
        let mut report = BootReport::default();

        for table in Table::ALL {
            if !self.inner.persistence.is_blank(table).await? {
                continue;
            }

            if self.restore_from_cloud(table, mirror).await? {
                report.restored.push(table);
            } else {
                let _guard = self.lock(table).await;
                self.inner
                    .persistence
                    .write_value(table, &table.default_value())
                    .await?;
                report.defaulted.push(table);
            }
        }

        info!(
            restored = report.restored.len(),
            defaulted = report.defaulted.len(),
            "storage boot finished"
        );
        Ok(report)
    }

    /// Hydrate `table` from the mirror; `false` when the mirror had nothing
    ///
    /// Restored rows are not echoed back to the mirror.
    pub async fn restore_from_cloud(
        &self,
        table: Table,
        mirror: &CloudMirror,
    ) -> StorageResult<bool> {
        if !table.is_mirrored() {
            return Ok(false);
        }
        let Some(rows) = mirror.load_from_cloud(table).await else {
            return Ok(false);
        };

        let _guard = self.lock(table).await;
        self.persist(table, &rows).await?;
        info!(table = %table, count = rows.len(), "restored table from cloud");
        Ok(true)
    }

    // ==================== Internals ====================

    async fn add_checked<F>(&self, table: Table, mut record: Record, check: F) -> StorageResult<Record>
    where
        F: FnOnce(&Record) -> StorageResult<()>,
    {
        record.ensure_metadata(Utc::now());
        check(&record)?;

        let _guard = self.lock(table).await;
        let mut records = self.read(table).await?;
        records.push(record.clone());
        self.persist(table, &records).await?;

        debug!(table = %table, id = ?record.id(), "record added");
        if table.is_mirrored() {
            self.publish(MirrorEvent::Upsert {
                table,
                record: record.clone(),
            });
        }
        Ok(record)
    }

    async fn update_checked<F>(
        &self,
        table: Table,
        id: &str,
        patch: &Map<String, Value>,
        check: F,
    ) -> StorageResult<Record>
    where
        F: FnOnce(&Record) -> StorageResult<()>,
    {
        let _guard = self.lock(table).await;
        let mut records = self.read(table).await?;

        let pos = records
            .iter()
            .position(|r| r.has_id(id))
            .ok_or_else(|| StorageError::RecordNotFound {
                table,
                id: id.to_string(),
            })?;

        let mut updated = records[pos].clone();
        updated.apply_patch(patch, Utc::now());
        check(&updated)?;

        records[pos] = updated.clone();
        self.persist(table, &records).await?;

        debug!(table = %table, id, "record updated");
        if table.is_mirrored() {
            self.publish(MirrorEvent::Upsert {
                table,
                record: updated.clone(),
            });
        }
        Ok(updated)
    }

    /// Serialize read-modify-write cycles on `table`
    async fn lock(&self, table: Table) -> MutexGuard<'_, ()> {
        // Built with one entry per table
        self.inner.locks[&table].lock().await
    }

    async fn persist(&self, table: Table, records: &[Record]) -> StorageResult<()> {
        let value = if table.is_object() {
            records
                .first()
                .cloned()
                .map(Record::into_value)
                .unwrap_or_else(|| table.default_value())
        } else {
            Value::Array(records.iter().cloned().map(Record::into_value).collect())
        };
        self.inner.persistence.write_value(table, &value).await
    }

    fn decode(&self, table: Table, value: Option<Value>) -> StorageResult<Vec<Record>> {
        match value {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| {
                    Record::from_value(item)
                        .ok_or_else(|| self.invalid(table, "every row must be a JSON object"))
                })
                .collect(),
            // An object table reads as a single record, or none when empty
            Some(Value::Object(map)) if table.is_object() => Ok(if map.is_empty() {
                Vec::new()
            } else {
                vec![Record::from_map(map)]
            }),
            Some(_) => Err(self.invalid(table, "expected a JSON array")),
        }
    }

    fn invalid(&self, table: Table, details: &str) -> StorageError {
        StorageError::InvalidFormat {
            path: self.inner.persistence.path(table),
            details: details.to_string(),
        }
    }

    fn publish(&self, event: MirrorEvent) {
        if let Some(tx) = &self.inner.events {
            // A closed channel means the worker is gone; local writes carry on
            let _ = tx.send(event);
        }
    }
}

fn to_entity<T: Entity>(record: &Record) -> StorageResult<T> {
    serde_json::from_value(record.clone().into_value())
        .map_err(|e| StorageError::Validation(vec![FieldError::new("record", e.to_string())]))
}

fn validated<T: Entity>(record: &Record) -> StorageResult<T> {
    let entity: T = to_entity(record)?;
    let errors = entity.validate();
    if errors.is_empty() {
        Ok(entity)
    } else {
        Err(StorageError::Validation(errors))
    }
}

fn not_an_object() -> FieldError {
    FieldError::new("record", "expected a JSON object")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MemoryBackend;
    use crate::models::{Pigeon, RaceRecord};
    use serde_json::json;
    use tempfile::TempDir;

    fn rec(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    fn setup() -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        (temp, store)
    }

    #[tokio::test]
    async fn test_missing_table_reads_empty() {
        let (_temp, store) = setup();
        assert!(store.read(Table::Pigeons).await.unwrap().is_empty());
        assert!(store.settings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_assigns_metadata() {
        let (_temp, store) = setup();
        let added = store
            .add(Table::Pigeons, rec(json!({"ringNumber": "BE-1"})))
            .await
            .unwrap();

        assert!(added.id().is_some());
        assert!(added.created_at().is_some());
        assert_eq!(added.created_at(), added.updated_at());

        let rows = store.read(Table::Pigeons).await.unwrap();
        assert_eq!(rows, vec![added]);
    }

    #[tokio::test]
    async fn test_add_keeps_given_id() {
        let (_temp, store) = setup();
        let added = store
            .add(Table::Logs, rec(json!({"id": "fixed", "msg": "x"})))
            .await
            .unwrap();
        assert!(added.has_id("fixed"));
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_identity() {
        let (_temp, store) = setup();
        let added = store
            .add(Table::Pigeons, rec(json!({"ringNumber": "BE-1", "color": "blue"})))
            .await
            .unwrap();
        let id = added.id().unwrap();

        let updated = store
            .update(
                Table::Pigeons,
                &id,
                &patch(json!({"color": "red", "id": "other", "createdAt": "never"})),
            )
            .await
            .unwrap();

        assert!(updated.has_id(&id));
        assert_eq!(updated.get("color"), Some(&json!("red")));
        assert_eq!(updated.get("ringNumber"), Some(&json!("BE-1")));
        assert_eq!(updated.created_at(), added.created_at());
    }

    #[tokio::test]
    async fn test_update_is_idempotent_on_fields() {
        let (_temp, store) = setup();
        let id = store
            .add(Table::Races, rec(json!({"name": "Pau"})))
            .await
            .unwrap()
            .id()
            .unwrap();

        let p = patch(json!({"distance": 800}));
        let first = store.update(Table::Races, &id, &p).await.unwrap();
        let second = store.update(Table::Races, &id, &p).await.unwrap();

        let strip = |r: Record| {
            let mut map = r.into_map();
            map.remove("updatedAt");
            map
        };
        assert_eq!(strip(first), strip(second));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let (_temp, store) = setup();
        let err = store
            .update(Table::Pigeons, "nope", &Map::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_numeric_ids_reach_typed_api() {
        let (temp, store) = setup();
        std::fs::write(
            temp.path().join("pigeons.json"),
            r#"[{"id":1,"ringNumber":"GB-1"},{"id":"s","ringNumber":"GB-2"}]"#,
        )
        .unwrap();

        let pigeons: Vec<Pigeon> = store.list().await.unwrap();
        assert_eq!(pigeons.len(), 2);
        assert_eq!(pigeons[0].id.as_deref(), Some("1"));

        let fetched: Pigeon = store.get_entity("1").await.unwrap().unwrap();
        assert_eq!(fetched.ring_number, "GB-1");

        let patched: Pigeon = store
            .patch("1", &patch(json!({"name": "Mealy"})))
            .await
            .unwrap();
        assert_eq!(patched.name.as_deref(), Some("Mealy"));
        assert_eq!(patched.id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_delete_first_match_only() {
        let (_temp, store) = setup();
        store
            .write(
                Table::Tokens,
                vec![
                    rec(json!({"id": "a", "n": 1})),
                    rec(json!({"id": "a", "n": 2})),
                    rec(json!({"id": "b"})),
                ],
            )
            .await
            .unwrap();

        assert!(store.delete(Table::Tokens, "a").await.unwrap());
        assert!(store.delete(Table::Tokens, "missing").await.unwrap());

        let rows = store.read(Table::Tokens).await.unwrap();
        assert_eq!(rows, vec![rec(json!({"id": "a", "n": 2})), rec(json!({"id": "b"}))]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_both_survive() {
        let (_temp, store) = setup();
        let id = store
            .add(Table::Pigeons, rec(json!({"ringNumber": "NL-7"})))
            .await
            .unwrap()
            .id()
            .unwrap();

        let a = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .update(Table::Pigeons, &id, &patch(json!({"color": "mealy"})))
                    .await
            })
        };
        let b = {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .update(Table::Pigeons, &id, &patch(json!({"strain": "Janssen"})))
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let record = store.get(Table::Pigeons, &id).await.unwrap().unwrap();
        assert_eq!(record.get("color"), Some(&json!("mealy")));
        assert_eq!(record.get("strain"), Some(&json!("Janssen")));
    }

    #[tokio::test]
    async fn test_invalid_table_file() {
        let (temp, store) = setup();
        std::fs::write(temp.path().join("races.json"), "{not json").unwrap();
        let err = store.read(Table::Races).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidFormat { .. }));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (_temp, store) = setup();
        let mut settings = Map::new();
        settings.insert("units".to_string(), json!("km"));
        store.save_settings(settings.clone()).await.unwrap();

        assert_eq!(store.settings().await.unwrap(), settings);
        assert_eq!(store.count(Table::Settings).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_counts_tables() {
        let (_temp, store) = setup();
        store.add(Table::Pigeons, rec(json!({"ringNumber": "A"}))).await.unwrap();
        store.add(Table::Pigeons, rec(json!({"ringNumber": "B"}))).await.unwrap();
        store.add(Table::News, rec(json!({"title": "t"}))).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.tables[&Table::Pigeons], 2);
        assert_eq!(stats.tables[&Table::News], 1);
        assert_eq!(stats.total, 3);
    }

    #[tokio::test]
    async fn test_insert_validates() {
        let (_temp, store) = setup();
        let err = store.insert(&Pigeon::new("  ")).await.unwrap_err();
        match err {
            StorageError::Validation(errors) => assert_eq!(errors[0].field, "ringNumber"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.read(Table::Pigeons).await.unwrap().is_empty());

        let stored = store.insert(&Pigeon::new("GB-2024-1")).await.unwrap();
        assert!(stored.id.is_some());
        assert_eq!(store.list::<Pigeon>().await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn test_patch_rejects_invalid_result() {
        let (_temp, store) = setup();
        let stored = store
            .insert_record::<RaceRecord>(rec(json!({"name": "Orleans"})))
            .await
            .unwrap();
        let id = stored.id.unwrap();

        let err = store
            .patch::<RaceRecord>(&id, &patch(json!({"name": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let kept: RaceRecord = store.get_entity(&id).await.unwrap().unwrap();
        assert_eq!(kept.name, "Orleans");
    }

    #[tokio::test]
    async fn test_writes_publish_events() {
        let temp = TempDir::new().unwrap();
        let (store, mut events) = FileStore::mirrored(temp.path());

        let added = store.add(Table::Users, rec(json!({"email": "a@b.c"}))).await.unwrap();
        store.add(Table::Health, rec(json!({"note": "x"}))).await.unwrap();
        let id = added.id().unwrap();
        store.delete(Table::Users, &id).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(MirrorEvent::Upsert { table: Table::Users, record: added })
        );
        assert_eq!(
            events.recv().await,
            Some(MirrorEvent::Delete { table: Table::Users, id })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_boot_restores_blank_tables_from_cloud() {
        let (temp, store) = setup();
        std::fs::write(temp.path().join("pigeons.json"), "[]").unwrap();
        std::fs::write(
            temp.path().join("races.json"),
            r#"[{"id": "local", "name": "Tours"}]"#,
        )
        .unwrap();

        let cloud_pigeons = vec![
            rec(json!({"id": "p1", "ringNumber": "A"})),
            rec(json!({"id": "p2", "ringNumber": "B"})),
        ];
        let backend = Arc::new(
            MemoryBackend::new()
                .with_rows(Table::Pigeons, cloud_pigeons.clone())
                .with_rows(Table::Races, vec![rec(json!({"id": "cloud"}))]),
        );
        let mirror = CloudMirror::connect(Some(backend)).await;

        let report = store.boot(&mirror).await.unwrap();

        assert_eq!(report.restored, vec![Table::Pigeons]);
        assert_eq!(store.read(Table::Pigeons).await.unwrap(), cloud_pigeons);
        // Non-blank tables are left alone
        assert!(store.read(Table::Races).await.unwrap()[0].has_id("local"));
        assert!(report.defaulted.contains(&Table::Settings));
    }

    #[tokio::test]
    async fn test_boot_local_only_writes_defaults() {
        let (temp, store) = setup();
        let report = store.boot(&CloudMirror::local_only()).await.unwrap();

        assert!(report.restored.is_empty());
        assert_eq!(report.defaulted.len(), Table::ALL.len());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("settings.json")).unwrap(),
            "{}"
        );
        let users: Value =
            serde_json::from_str(&std::fs::read_to_string(temp.path().join("users.json")).unwrap())
                .unwrap();
        assert_eq!(users, json!([]));
    }
}
