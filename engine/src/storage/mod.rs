//! Storage adapter boundary.
//!
//! The engine only talks to storage through [`StorageAdapter`]. Adapters
//! translate their driver failures into a [`StorageError`] tagged with a
//! [`FailureKind`], which is what the orchestrator's retry loops inspect.

pub mod memory;
pub mod registry;

use crate::metadata::{MdEntry, PrimaryKey, RowData};
use crate::{Revision, TableName};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::{FailPoint, MemoryAdapter, MemoryStore};
pub use registry::{AdapterFactory, AdapterOptions, AdapterRegistry};

/// How a storage failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Serialization failure or aborted transaction; the call may be retried.
    Transient,
    /// Unique constraint violated.
    Uniqueness,
    /// Anything else.
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Uniqueness => write!(f, "uniqueness"),
            FailureKind::Other => write!(f, "other"),
        }
    }
}

/// A failure reported by a storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} storage failure: {message}")]
pub struct StorageError {
    pub kind: FailureKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn uniqueness(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Uniqueness, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// Build an error from a SQLSTATE code reported by a driver.
    pub fn from_sqlstate(code: &str, message: impl Into<String>) -> Self {
        Self::new(classify_sqlstate(code), message)
    }
}

/// Result type for adapter calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Map a SQLSTATE code onto a [`FailureKind`].
///
/// `40001` (serialization failure) and `40P01` (deadlock detected) are
/// retryable, `23505` is a unique constraint violation.
pub fn classify_sqlstate(code: &str) -> FailureKind {
    match code {
        "40001" | "40P01" => FailureKind::Transient,
        "23505" => FailureKind::Uniqueness,
        _ => FailureKind::Other,
    }
}

/// Name of the metadata table that shadows a synchronized table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataTable {
    /// The synchronized data table
    pub table: TableName,
    /// The metadata table's own name (`<table><suffix>`)
    pub name: String,
}

impl MetadataTable {
    pub fn new(table: impl Into<TableName>, suffix: &str) -> Self {
        let table = table.into();
        let name = format!("{table}{suffix}");
        Self { table, name }
    }
}

/// One row of a metadata table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMetadata {
    pub entry: MdEntry,
    /// Client-side "locally modified" flag; always false on the server
    pub modified: bool,
}

/// Definition of a synchronized data table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub name: TableName,
    pub primary_key: String,
    pub columns: Vec<String>,
}

impl TableDef {
    pub fn new(
        name: impl Into<TableName>,
        primary_key: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let primary_key = primary_key.into();
        let mut columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if !columns.contains(&primary_key) {
            columns.insert(0, primary_key.clone());
        }
        Self {
            name: name.into(),
            primary_key,
            columns,
        }
    }
}

/// Row-level access to one side's database.
///
/// All calls block. Calls made between [`begin`](Self::begin) and
/// [`commit`](Self::commit)/[`rollback`](Self::rollback) belong to one
/// transaction, which the adapter should run at the strongest isolation level
/// it has.
pub trait StorageAdapter {
    fn begin(&mut self) -> StorageResult<()>;
    fn commit(&mut self) -> StorageResult<()>;
    /// Discard the open transaction. A no-op when none is open.
    fn rollback(&mut self) -> StorageResult<()>;

    /// Column names of a data table.
    fn table_columns(&mut self, table: &str) -> StorageResult<Vec<String>>;
    /// Name of a data table's primary key column, if the adapter knows it.
    fn primary_key_column(&mut self, table: &str) -> StorageResult<Option<String>>;

    fn metadata_table_exists(&mut self, md: &MetadataTable) -> StorageResult<bool>;
    /// Create a metadata table. Fails with [`FailureKind::Uniqueness`] if it
    /// already exists.
    fn create_metadata_table(&mut self, md: &MetadataTable) -> StorageResult<()>;

    /// Latest revision: minted revisions on the server, the last fully
    /// incorporated server revision on a client.
    fn current_revision(&mut self) -> StorageResult<Revision>;
    /// Mint and return the next revision (server side).
    fn next_revision(&mut self) -> StorageResult<Revision>;
    /// Record the incorporated server revision (client side).
    fn set_revision(&mut self, revision: Revision) -> StorageResult<()>;

    fn get_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<Option<RowData>>;
    /// Insert a row. Fails with [`FailureKind::Uniqueness`] on a duplicate key.
    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<()>;
    /// Replace a row. Returns false if it did not exist.
    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<bool>;
    /// Returns false if the row did not exist.
    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<bool>;

    fn get_metadata(
        &mut self,
        md: &MetadataTable,
        pk: &PrimaryKey,
    ) -> StorageResult<Option<StoredMetadata>>;
    /// Insert or replace the metadata row for `meta.entry.primary_key`.
    fn put_metadata(&mut self, md: &MetadataTable, meta: &StoredMetadata) -> StorageResult<()>;
    /// Metadata rows with `revision > since`, in primary-key order.
    fn metadata_since(
        &mut self,
        md: &MetadataTable,
        since: Revision,
    ) -> StorageResult<Vec<StoredMetadata>>;
    /// Metadata rows flagged as locally modified, in primary-key order.
    fn flagged_metadata(&mut self, md: &MetadataTable) -> StorageResult<Vec<StoredMetadata>>;
}

impl<A: StorageAdapter + ?Sized> StorageAdapter for Box<A> {
    fn begin(&mut self) -> StorageResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> StorageResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> StorageResult<()> {
        (**self).rollback()
    }

    fn table_columns(&mut self, table: &str) -> StorageResult<Vec<String>> {
        (**self).table_columns(table)
    }

    fn primary_key_column(&mut self, table: &str) -> StorageResult<Option<String>> {
        (**self).primary_key_column(table)
    }

    fn metadata_table_exists(&mut self, md: &MetadataTable) -> StorageResult<bool> {
        (**self).metadata_table_exists(md)
    }

    fn create_metadata_table(&mut self, md: &MetadataTable) -> StorageResult<()> {
        (**self).create_metadata_table(md)
    }

    fn current_revision(&mut self) -> StorageResult<Revision> {
        (**self).current_revision()
    }

    fn next_revision(&mut self) -> StorageResult<Revision> {
        (**self).next_revision()
    }

    fn set_revision(&mut self, revision: Revision) -> StorageResult<()> {
        (**self).set_revision(revision)
    }

    fn get_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<Option<RowData>> {
        (**self).get_row(table, pk)
    }

    fn insert_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<()> {
        (**self).insert_row(table, pk, row)
    }

    fn update_row(&mut self, table: &str, pk: &PrimaryKey, row: &RowData) -> StorageResult<bool> {
        (**self).update_row(table, pk, row)
    }

    fn delete_row(&mut self, table: &str, pk: &PrimaryKey) -> StorageResult<bool> {
        (**self).delete_row(table, pk)
    }

    fn get_metadata(
        &mut self,
        md: &MetadataTable,
        pk: &PrimaryKey,
    ) -> StorageResult<Option<StoredMetadata>> {
        (**self).get_metadata(md, pk)
    }

    fn put_metadata(&mut self, md: &MetadataTable, meta: &StoredMetadata) -> StorageResult<()> {
        (**self).put_metadata(md, meta)
    }

    fn metadata_since(
        &mut self,
        md: &MetadataTable,
        since: Revision,
    ) -> StorageResult<Vec<StoredMetadata>> {
        (**self).metadata_since(md, since)
    }

    fn flagged_metadata(&mut self, md: &MetadataTable) -> StorageResult<Vec<StoredMetadata>> {
        (**self).flagged_metadata(md)
    }
}
