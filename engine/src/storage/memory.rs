//! In-memory storage adapter.
//!
//! A [`MemoryStore`] is one database shared by any number of
//! [`MemoryAdapter`] connections. Transactions work on a private copy of the
//! database and are validated at commit: if another connection committed a
//! write in the meantime, the commit fails with a transient serialization
//! failure, the way a serializable SQL transaction would.

use super::{
    FailureKind, MetadataTable, StorageAdapter, StorageError, StorageResult, StoredMetadata,
    TableDef,
};
use crate::metadata::{PrimaryKey, RowData};
use crate::{Revision, TableName};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Adapter calls that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Commit,
    CreateMetadataTable,
    InsertRow,
    UpdateRow,
    DeleteRow,
    MetadataScan,
}

#[derive(Debug, Clone)]
struct Fault {
    point: FailPoint,
    kind: FailureKind,
    remaining: u32,
}

#[derive(Debug, Clone, Default)]
struct MemTable {
    def: Option<TableDef>,
    rows: BTreeMap<PrimaryKey, RowData>,
}

#[derive(Debug, Clone, Default)]
struct Database {
    /// Bumped on every committed write; used for commit validation
    version: u64,
    revision: Revision,
    tables: BTreeMap<TableName, MemTable>,
    metadata: BTreeMap<String, BTreeMap<PrimaryKey, StoredMetadata>>,
}

impl Database {
    fn table(&self, name: &str) -> StorageResult<&MemTable> {
        self.tables
            .get(name)
            .ok_or_else(|| StorageError::other(format!("relation \"{name}\" does not exist")))
    }

    fn table_mut(&mut self, name: &str) -> StorageResult<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StorageError::other(format!("relation \"{name}\" does not exist")))
    }

    fn md(&self, md: &MetadataTable) -> StorageResult<&BTreeMap<PrimaryKey, StoredMetadata>> {
        self.metadata
            .get(&md.name)
            .ok_or_else(|| StorageError::other(format!("relation \"{}\" does not exist", md.name)))
    }

    fn md_mut(
        &mut self,
        md: &MetadataTable,
    ) -> StorageResult<&mut BTreeMap<PrimaryKey, StoredMetadata>> {
        self.metadata
            .get_mut(&md.name)
            .ok_or_else(|| StorageError::other(format!("relation \"{}\" does not exist", md.name)))
    }
}

fn check_columns(table: &MemTable, name: &str, row: &RowData) -> StorageResult<()> {
    if let Some(def) = &table.def {
        if let Some(unknown) = row.keys().find(|c| !def.columns.contains(c)) {
            return Err(StorageError::other(format!(
                "column \"{unknown}\" of relation \"{name}\" does not exist"
            )));
        }
    }
    Ok(())
}

/// Shared in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    db: Arc<Mutex<Database>>,
    faults: Arc<Mutex<Vec<Fault>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection.
    pub fn connect(&self) -> MemoryAdapter {
        MemoryAdapter {
            store: self.clone(),
            tx: None,
        }
    }

    /// Create (or replace the definition of) a data table.
    pub fn create_table(&self, def: TableDef) -> StorageResult<()> {
        let mut db = self.lock()?;
        let table = db.tables.entry(def.name.clone()).or_default();
        table.def = Some(def);
        db.version += 1;
        Ok(())
    }

    /// Make the next `times` calls at `point` fail with `kind`.
    pub fn inject_failure(&self, point: FailPoint, kind: FailureKind, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                point,
                kind,
                remaining: times,
            });
        }
    }

    /// Committed row, outside any transaction.
    pub fn row(&self, table: &str, pk: &PrimaryKey) -> Option<RowData> {
        let db = self.lock().ok()?;
        db.tables.get(table)?.rows.get(pk).cloned()
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|db| db.tables.get(table).map(|t| t.rows.len()))
            .unwrap_or(0)
    }

    /// Committed metadata row, outside any transaction.
    pub fn metadata(&self, md: &MetadataTable, pk: &PrimaryKey) -> Option<StoredMetadata> {
        let db = self.lock().ok()?;
        db.metadata.get(&md.name)?.get(pk).cloned()
    }

    pub fn has_metadata_table(&self, md: &MetadataTable) -> bool {
        self.lock()
            .map(|db| db.metadata.contains_key(&md.name))
            .unwrap_or(false)
    }

    /// Committed revision.
    pub fn revision(&self) -> Revision {
        self.lock().map(|db| db.revision).unwrap_or(0)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| StorageError::other("memory store lock poisoned"))
    }

    fn trip(&self, point: FailPoint) -> StorageResult<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StorageError::other("memory store lock poisoned"))?;
        if let Some(fault) = faults.iter_mut().find(|f| f.point == point && f.remaining > 0) {
            fault.remaining -= 1;
            let kind = fault.kind;
            faults.retain(|f| f.remaining > 0);
            return Err(StorageError::new(
                kind,
                format!("injected {kind} failure at {point:?}"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Transaction {
    base_version: u64,
    dirty: bool,
    working: Database,
}

/// One connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryAdapter {
    store: MemoryStore,
    tx: Option<Transaction>,
}

impl MemoryAdapter {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn read<R>(&self, f: impl FnOnce(&Database) -> StorageResult<R>) -> StorageResult<R> {
        match &self.tx {
            Some(tx) => f(&tx.working),
            None => f(&*self.store.lock()?),
        }
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut Database) -> StorageResult<R>) -> StorageResult<R> {
        match &mut self.tx {
            Some(tx) => {
                let out = f(&mut tx.working)?;
                tx.dirty = true;
                Ok(out)
            }
            None => {
                let mut db = self.store.lock()?;
                let out = f(&mut db)?;
                db.version += 1;
                Ok(out)
            }
        }
    }
}

impl StorageAdapter for MemoryAdapter {
    fn begin(&mut self) -> StorageResult<()> {
        if self.tx.is_some() {
            return Err(StorageError::other("transaction already open"));
        }
        let db = self.store.lock()?;
        self.tx = Some(Transaction {
            base_version: db.version,
            dirty: false,
            working: db.clone(),
        });
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StorageError::other("no transaction open"))?;
        self.store.trip(FailPoint::Commit)?;
        if !tx.dirty {
            return Ok(());
        }
        let mut db = self.store.lock()?;
        if db.version != tx.base_version {
            return Err(StorageError::transient(
                "could not serialize access due to concurrent update",
            ));
        }
        let mut working = tx.working;
        working.version = db.version + 1;
        *db = working;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.tx = None;
        Ok(())
    }

    fn table_columns(&mut self, table: &str) -> StorageResult<Vec<String>> {
        self.read(|db| {
            let t = db.table(table)?;
            Ok(t.def.as_ref().map(|d| d.columns.clone()).unwrap_or_default())
        })
    }

    fn primary_key_column(&mut self, table: &str) -> StorageResult<Option<String>> {
        self.read(|db| Ok(db.table(table)?.def.as_ref().map(|d| d.primary_key.clone())))
    }

    fn metadata_table_exists(&mut self, md: &MetadataTable) -> StorageResult<bool> {
        self.read(|db| Ok(db.metadata.contains_key(&md.name)))
    }

    fn create_metadata_table(&mut self, md: &MetadataTable) -> StorageResult<()> {
        self.store.trip(FailPoint::CreateMetadataTable)?;
        self.write(|db| {
            if db.metadata.contains_key(&md.name) {
                return Err(StorageError::uniqueness(format!(
                    "relation \"{}\" already exists",
                    md.name
                )));
            }
            db.metadata.insert(md.name.clone(), BTreeMap::new());
            Ok(())
        })
    }

    fn current_revision(&mut self) -> StorageResult<Revision> {
        self.read(|db| Ok(db.revision))
    }

    fn next_revision(&mut self) -> StorageResult<Revision> {
        self.write(|db| {
            db.revision += 1;
            Ok(db.revision)
        })
    }

    fn set_revision(&mut self, revision: Revision) -> StorageResult<()> {
        self.write(|db| {
            db.revision = revision;
            Ok(())
        })
    }

    fn get_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<Option<RowData>> {
        self.read(|db| Ok(db.table(table)?.rows.get(pk).cloned()))
    }

    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<()> {
        self.store.trip(FailPoint::InsertRow)?;
        self.write(|db| {
            let t = db.table_mut(table)?;
            check_columns(t, table, row)?;
            if t.rows.contains_key(pk) {
                return Err(StorageError::uniqueness(format!(
                    "duplicate key value violates unique constraint \"{table}_pkey\": {pk}"
                )));
            }
            t.rows.insert(pk.clone(), row.clone());
            Ok(())
        })
    }

    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<bool> {
        self.store.trip(FailPoint::UpdateRow)?;
        self.write(|db| {
            let t = db.table_mut(table)?;
            check_columns(t, table, row)?;
            match t.rows.get_mut(pk) {
                Some(existing) => {
                    *existing = row.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<bool> {
        self.store.trip(FailPoint::DeleteRow)?;
        self.write(|db| Ok(db.table_mut(table)?.rows.remove(pk).is_some()))
    }

    fn get_metadata(
        &mut self,
        md: &MetadataTable,
        pk: &PrimaryKey,
    ) -> StorageResult<Option<StoredMetadata>> {
        self.read(|db| Ok(db.md(md)?.get(pk).cloned()))
    }

    fn put_metadata(&mut self, md: &MetadataTable, meta: &StoredMetadata) -> StorageResult<()> {
        self.write(|db| {
            db.md_mut(md)?
                .insert(meta.entry.primary_key.clone(), meta.clone());
            Ok(())
        })
    }

    fn metadata_since(
        &mut self,
        md: &MetadataTable,
        since: Revision,
    ) -> StorageResult<Vec<StoredMetadata>> {
        self.store.trip(FailPoint::MetadataScan)?;
        self.read(|db| {
            Ok(db
                .md(md)?
                .values()
                .filter(|m| m.entry.revision > since)
                .cloned()
                .collect())
        })
    }

    fn flagged_metadata(&mut self, md: &MetadataTable) -> StorageResult<Vec<StoredMetadata>> {
        self.store.trip(FailPoint::MetadataScan)?;
        self.read(|db| Ok(db.md(md)?.values().filter(|m| m.modified).cloned().collect()))
    }
}
