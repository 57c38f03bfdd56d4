//! Server side of a sync session.
//!
//! [`ServerSync`] answers the three protocol calls a client makes:
//! `validate`, `getChanges` and `applyChanges`. Every call blocks the caller
//! until it has committed or failed.

use crate::changes::{server_changes, ChangeSet};
use crate::config::SyncConfig;
use crate::conflict::ConflictHandlingData;
use crate::metadata::{check_row_key, compare_changes, Change, MdEntry, PrimaryKey, RowData};
use crate::resolver::ConflictHandler;
use crate::session::{ensure_metadata_tables, in_transaction, with_retries, SessionContext};
use crate::storage::{FailureKind, StorageAdapter, StoredMetadata};
use crate::strategy::TableSyncStrategies;
use crate::{error::Result, Error, Revision};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The calls a client makes against a server.
///
/// Implemented by [`ServerSync`] for in-process use; a transport binding
/// would implement it on a remote handle.
pub trait SyncServer {
    /// Check that the client's strategies agree with the server's, and make
    /// sure the server's metadata tables exist.
    fn validate(&mut self, strategies: &TableSyncStrategies) -> Result<()>;

    /// Server changes after `since`.
    fn get_changes(&mut self, since: Revision) -> Result<ChangeSet>;

    /// Apply client changes based on `client_revision`; returns the server
    /// revision assigned to the batch.
    fn apply_changes(&mut self, changes: &[Change], client_revision: Revision) -> Result<Revision>;
}

impl<S: SyncServer + ?Sized> SyncServer for &mut S {
    fn validate(&mut self, strategies: &TableSyncStrategies) -> Result<()> {
        (**self).validate(strategies)
    }

    fn get_changes(&mut self, since: Revision) -> Result<ChangeSet> {
        (**self).get_changes(since)
    }

    fn apply_changes(&mut self, changes: &[Change], client_revision: Revision) -> Result<Revision> {
        (**self).apply_changes(changes, client_revision)
    }
}

/// Stages of one `applyChanges` attempt, as they appear in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Start,
    Validating,
    TransactionOpen,
    ProcessingRow,
    Committing,
    Done,
    RolledBack,
    Failed,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyPhase::Start => "START",
            ApplyPhase::Validating => "VALIDATING",
            ApplyPhase::TransactionOpen => "TRANSACTION_OPEN",
            ApplyPhase::ProcessingRow => "PROCESSING_ROW",
            ApplyPhase::Committing => "COMMITTING",
            ApplyPhase::Done => "DONE",
            ApplyPhase::RolledBack => "ROLLED_BACK",
            ApplyPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Server sync session over one storage connection.
pub struct ServerSync<A: StorageAdapter> {
    adapter: A,
    ctx: SessionContext,
}

impl<A: StorageAdapter> fmt::Debug for ServerSync<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSync")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl<A: StorageAdapter> ServerSync<A> {
    /// Build a session. Fails with [`Error::Config`] when a `FIRE_EVENT` table
    /// has no handler.
    pub fn new(
        adapter: A,
        config: SyncConfig,
        handler: Option<Arc<dyn ConflictHandler>>,
    ) -> Result<Self> {
        let ctx = SessionContext::new(config, handler)?;
        Ok(Self { adapter, ctx })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn into_adapter(self) -> A {
        self.adapter
    }

    /// Create any missing metadata table.
    pub fn ensure_metadata_tables(&mut self) -> Result<()> {
        ensure_metadata_tables(&mut self.adapter, &self.ctx.config)
    }

    /// Check the client's strategies against ours.
    ///
    /// Every table the client synchronizes must be synchronized here too, with
    /// an equal strategy.
    pub fn validate(&mut self, remote: &TableSyncStrategies) -> Result<()> {
        let local = &self.ctx.config.strategies;
        for table in remote.tables() {
            if !local.contains(table) {
                return Err(Error::TableNotSynchronized(table.clone()));
            }
            let ours = local.strategy(table);
            let theirs = remote.strategy(table);
            if ours != theirs {
                return Err(Error::StrategyMismatch {
                    table: table.clone(),
                    local: ours.to_string(),
                    remote: theirs.to_string(),
                });
            }
        }
        self.ensure_metadata_tables()?;
        debug!("Validated {} client tables", remote.len());
        Ok(())
    }

    /// Changes after `since`, retried as a whole on transient failures.
    pub fn get_changes(&mut self, since: Revision) -> Result<ChangeSet> {
        let retries = self.ctx.config.get_changes_retries;
        with_retries(self, "getChanges", retries, |this| this.get_changes_once(since))
    }

    fn get_changes_once(&mut self, since: Revision) -> Result<ChangeSet> {
        self.ensure_metadata_tables()?;
        let config = &self.ctx.config;
        let set = in_transaction(&mut self.adapter, |adapter| {
            server_changes(adapter, config, since)
        })?;
        info!(
            "getChanges since {}: {} changes, revision {}",
            since,
            set.len(),
            set.revision
        );
        Ok(set)
    }

    /// Apply a batch of client changes in one transaction.
    ///
    /// The whole batch gets one freshly minted revision, returned on success.
    /// Transient failures retry the whole call; a `FIRE_EVENT` handler may
    /// therefore see the same conflict more than once.
    pub fn apply_changes(&mut self, changes: &[Change], client_revision: Revision) -> Result<Revision> {
        info!(
            "applyChanges [{}]: {} changes based on revision {}",
            ApplyPhase::Start,
            changes.len(),
            client_revision
        );
        debug!("applyChanges [{}]", ApplyPhase::Validating);
        if let Err(e) = self.check_changes(changes) {
            warn!("applyChanges [{}]: {}", ApplyPhase::Failed, e);
            return Err(e);
        }

        let mut ordered: Vec<&Change> = changes.iter().collect();
        ordered.sort_by(|a, b| compare_changes(a, b));

        let retries = self.ctx.config.apply_retries;
        let result = with_retries(self, "applyChanges", retries, |this| {
            this.apply_once(&ordered, client_revision)
        });
        match &result {
            Ok(revision) => info!("applyChanges [{}]: revision {}", ApplyPhase::Done, revision),
            Err(e) => warn!("applyChanges [{}]: {}", ApplyPhase::Failed, e),
        }
        result
    }

    /// Reject batches that name unknown tables or columns, carry a row whose
    /// key column disagrees with its entry, or break the tombstone invariant,
    /// before anything is written.
    fn check_changes(&mut self, changes: &[Change]) -> Result<()> {
        let strategies = &self.ctx.config.strategies;
        let mut schemas: BTreeMap<&str, (BTreeSet<String>, Option<String>)> = BTreeMap::new();

        for change in changes {
            let table = change.table();
            if !strategies.contains(table) {
                return Err(Error::TableNotSynchronized(table.to_string()));
            }
            if !strategies.strategy(table).direction().sends_client_changes() {
                return Err(Error::Protocol(format!(
                    "table {table} does not accept client changes"
                )));
            }
            change.check_invariant().map_err(Error::Protocol)?;

            if !schemas.contains_key(table) {
                let known = self.adapter.table_columns(table).map_err(apply_failure)?;
                let key = self.adapter.primary_key_column(table).map_err(apply_failure)?;
                schemas.insert(table, (known.into_iter().collect(), key));
            }
            let (known, key_column) = &schemas[table];

            if let (Some(column), Some(row)) = (key_column, change.row.as_ref()) {
                check_row_key(row, column, change.primary_key()).map_err(Error::Protocol)?;
            }

            let unknown: Vec<String> = change
                .columns()
                .filter(|c| !known.contains(*c))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(Error::UnknownColumns {
                    table: table.to_string(),
                    columns: unknown,
                });
            }
        }
        Ok(())
    }

    fn apply_once(&mut self, changes: &[&Change], client_revision: Revision) -> Result<Revision> {
        self.ensure_metadata_tables().map_err(apply_failure)?;
        let ctx = &self.ctx;
        let adapter = &mut self.adapter;

        adapter.begin().map_err(apply_failure)?;
        debug!("applyChanges [{}]", ApplyPhase::TransactionOpen);

        let result = apply_batch(adapter, ctx, changes, client_revision).and_then(|revision| {
            debug!("applyChanges [{}]", ApplyPhase::Committing);
            adapter.commit()?;
            Ok(revision)
        });

        match result {
            Ok(revision) => Ok(revision),
            Err(e) => {
                if let Err(rb) = adapter.rollback() {
                    warn!("Rollback failed: {}", rb);
                }
                debug!("applyChanges [{}]: {}", ApplyPhase::RolledBack, e);
                Err(apply_failure(e))
            }
        }
    }
}

/// Storage failures that are neither retried nor a uniqueness race surface
/// as [`Error::ApplyFailed`].
fn apply_failure(e: impl Into<Error>) -> Error {
    match e.into() {
        Error::Storage(e) if e.kind != FailureKind::Transient => Error::ApplyFailed(e.message),
        other => other,
    }
}

impl<A: StorageAdapter> SyncServer for ServerSync<A> {
    fn validate(&mut self, strategies: &TableSyncStrategies) -> Result<()> {
        ServerSync::validate(self, strategies)
    }

    fn get_changes(&mut self, since: Revision) -> Result<ChangeSet> {
        ServerSync::get_changes(self, since)
    }

    fn apply_changes(&mut self, changes: &[Change], client_revision: Revision) -> Result<Revision> {
        ServerSync::apply_changes(self, changes, client_revision)
    }
}

fn apply_batch<A: StorageAdapter>(
    adapter: &mut A,
    ctx: &SessionContext,
    changes: &[&Change],
    client_revision: Revision,
) -> Result<Revision> {
    let current = adapter.current_revision()?;
    if client_revision > current {
        return Err(Error::Protocol(format!(
            "client revision {client_revision} is ahead of server revision {current}"
        )));
    }

    let revision = adapter.next_revision()?;
    for change in changes {
        debug!(
            "applyChanges [{}]: {}/{}",
            ApplyPhase::ProcessingRow,
            change.table(),
            change.primary_key()
        );
        apply_change(adapter, ctx, change, revision)?;
    }
    Ok(revision)
}

fn apply_change<A: StorageAdapter>(
    adapter: &mut A,
    ctx: &SessionContext,
    change: &Change,
    revision: Revision,
) -> Result<()> {
    let table = change.table();
    let pk = change.primary_key();
    let md = ctx.config.metadata_table(table);
    let base = change.entry.revision;

    let row = match adapter.get_metadata(&md, pk)? {
        // The server moved past what the client based its change on.
        Some(meta) if meta.entry.revision > base => {
            let server_row = if meta.entry.exists {
                adapter.get_row(table, pk)?
            } else {
                None
            };

            if let (Some(ours), Some(theirs)) = (server_row.as_ref(), change.row.as_ref()) {
                if ctx.hasher.hash(Some(theirs)) == ctx.hasher.hash(Some(ours)) {
                    debug!("{}/{} already matches, restamping", table, pk);
                    return persist(adapter, ctx, table, pk, Some(ours), revision);
                }
            }

            let remote = match server_row {
                Some(row) => Change::live(meta.entry.clone(), row),
                None => Change::deleted(MdEntry::tombstone(table, pk.clone(), meta.entry.revision)),
            };
            let data = ConflictHandlingData::new(change.clone(), base, remote, meta.entry.revision);
            let resolution = ctx.resolvers.resolve(&data)?;
            info!(
                "Conflict {} on {}/{} (client base {}, server {}): {:?} wins",
                resolution.kind, table, pk, base, meta.entry.revision, resolution.winner
            );
            resolution.row
        }
        _ => change.row.clone(),
    };

    persist(adapter, ctx, table, pk, row.as_ref(), revision)
}

/// Write the surviving row and stamp its metadata with `revision`.
fn persist<A: StorageAdapter>(
    adapter: &mut A,
    ctx: &SessionContext,
    table: &str,
    pk: &PrimaryKey,
    row: Option<&RowData>,
    revision: Revision,
) -> Result<()> {
    let md = ctx.config.metadata_table(table);
    let not_unique = |e: crate::storage::StorageError| -> Error {
        if e.kind == FailureKind::Uniqueness {
            Error::EntryNotUnique {
                table: table.to_string(),
                primary_key: pk.clone(),
            }
        } else {
            e.into()
        }
    };

    let entry = match row {
        Some(row) => {
            if !adapter.update_row(table, pk, row)? {
                adapter.insert_row(table, pk, row).map_err(not_unique)?;
            }
            MdEntry::live(table, pk.clone(), revision, ctx.hasher.hash(Some(row)))
        }
        None => {
            adapter.delete_row(table, pk)?;
            MdEntry::tombstone(table, pk.clone(), revision)
        }
    };

    adapter
        .put_metadata(
            &md,
            &StoredMetadata {
                entry,
                modified: false,
            },
        )
        .map_err(not_unique)
}
