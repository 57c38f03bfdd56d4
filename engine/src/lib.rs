//! # Revsync Engine
//!
//! Optimistic, revision-based replication of relational tables between a
//! server and any number of occasionally connected clients.
//!
//! Every synchronized table `T` is shadowed by a metadata table (`T_md` by
//! default) holding one [`MdEntry`] per row: the server revision the row is
//! as-of, whether it still exists, and a content digest. Clients pull rows
//! whose revision is newer than theirs and push rows they flagged as locally
//! modified. The server detects a conflict when it moved past the revision a
//! client based its change on, and settles it with the table's
//! [`ConflictStrategy`].
//!
//! ## Core Concepts
//!
//! ### Strategies
//!
//! Each table has a [`TableSyncStrategy`]: a [`SyncDirection`] plus a
//! [`ConflictStrategy`] (`CLIENT_WINS`, `SERVER_WINS` or `FIRE_EVENT`).
//! Incompatible pairs are rejected when the strategy is built.
//!
//! ### Revisions
//!
//! The server mints one revision per `applyChanges` batch. Revisions only
//! ever grow; a client remembers the last one it fully incorporated.
//!
//! ### Conflicts
//!
//! A colliding pair is classified into one of six [`ConflictKind`]s, where
//! "local" is the client's pending change and "remote" the server's state.
//! [`Resolvers`] pick the surviving row.
//!
//! ### Storage
//!
//! All database access goes through the [`StorageAdapter`] trait. Failures
//! carry a [`FailureKind`] that drives the retry loops. [`MemoryStore`] is a
//! complete in-memory adapter with serializable transactions.
//!
//! ## Quick Start
//!
//! ```rust
//! use revsync_engine::{
//!     ClientSync, MemoryStore, PrimaryKey, RowData, ServerSync, SyncConfig,
//!     TableDef, TableSyncStrategies,
//! };
//! use serde_json::json;
//!
//! // 1. Describe what is synchronized
//! let config = SyncConfig::new(TableSyncStrategies::default().with_table("items"));
//!
//! // 2. One database per side
//! let server_db = MemoryStore::new();
//! let client_db = MemoryStore::new();
//! for db in [&server_db, &client_db] {
//!     db.create_table(TableDef::new("items", "id", ["name"])).unwrap();
//! }
//!
//! let mut server = ServerSync::new(server_db.connect(), config.clone(), None).unwrap();
//! let mut client = ClientSync::new(client_db.connect(), config, None).unwrap();
//!
//! // 3. Edit locally, then sync
//! let row: RowData = serde_json::from_value(json!({"id": 1, "name": "widget"})).unwrap();
//! client.record_local_change("items", PrimaryKey::Int(1), row).unwrap();
//!
//! let report = client.sync(&mut server).unwrap();
//! assert_eq!(report.pushed, 1);
//! assert_eq!(server_db.row("items", &PrimaryKey::Int(1)).unwrap()["name"], "widget");
//! ```

pub mod changes;
pub mod client;
pub mod config;
pub mod conflict;
pub mod error;
pub mod hasher;
pub mod metadata;
pub mod resolver;
pub mod server;
mod session;
pub mod storage;
pub mod strategy;

// Re-export main types at crate root
pub use changes::{client_changes, server_changes, ChangeSet};
pub use client::{ClientSync, ConflictRecord, PullReport, PushReport, SyncReport};
pub use config::{ConfigError, SyncConfig, DEFAULT_METADATA_SUFFIX};
pub use conflict::{classify, ConflictHandlingData, ConflictKind, LocalState};
pub use error::{Error, Result};
pub use hasher::{ContentHasher, DigestAlgorithm};
pub use metadata::{
    check_row_key, compare_changes, Change, MdEntry, PrimaryKey, RowData, DELETED_MDV,
};
pub use resolver::{
    ClientWins, ConflictHandler, ConflictResolver, FireEvent, Resolution, Resolvers, ServerWins,
    Winner,
};
pub use server::{ApplyPhase, ServerSync, SyncServer};
pub use session::ensure_metadata_tables;
pub use storage::{
    AdapterRegistry, FailureKind, MemoryAdapter, MemoryStore, MetadataTable, StorageAdapter,
    StorageError, StoredMetadata, TableDef,
};
pub use strategy::{ConflictStrategy, SyncDirection, TableSyncStrategies, TableSyncStrategy};

/// Type aliases for clarity
pub type TableName = String;
pub type Revision = u64;
