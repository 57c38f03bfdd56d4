//! Client side of a sync session.
//!
//! A [`ClientSync`] owns the client's storage connection and talks to a
//! server through [`SyncServer`]. Local edits are recorded with
//! [`ClientSync::record_local_change`] and [`ClientSync::record_local_delete`],
//! which flag the row's metadata as modified until a push clears it.

use crate::changes::{client_changes, ChangeSet};
use crate::config::SyncConfig;
use crate::conflict::{ConflictHandlingData, ConflictKind};
use crate::metadata::{check_row_key, rows_equal, Change, MdEntry, PrimaryKey, RowData};
use crate::resolver::{ConflictHandler, Winner};
use crate::server::SyncServer;
use crate::session::{ensure_metadata_tables, in_transaction, with_retries, SessionContext};
use crate::storage::{StorageAdapter, StoredMetadata};
use crate::{error::Result, Error, Revision, TableName};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A conflict met while pulling, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub table: TableName,
    pub primary_key: PrimaryKey,
    pub kind: ConflictKind,
    pub winner: Winner,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PullReport {
    /// Server changes written locally
    pub applied: usize,
    pub conflicts: Vec<ConflictRecord>,
    /// Client revision after the pull
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushReport {
    pub pushed: usize,
    /// Server revision assigned to the batch; `None` when nothing was pending
    pub revision: Option<Revision>,
}

/// Summary of one [`ClientSync::sync`] round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: Vec<ConflictRecord>,
    /// Client revision at the end of the round
    pub revision: Revision,
    /// Server revision assigned to the pushed batch
    pub server_revision: Option<Revision>,
}

/// Client sync session over one storage connection.
pub struct ClientSync<A: StorageAdapter> {
    adapter: A,
    ctx: SessionContext,
}

impl<A: StorageAdapter> fmt::Debug for ClientSync<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSync")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}

impl<A: StorageAdapter> ClientSync<A> {
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

    /// Last server revision fully incorporated by this client.
    pub fn revision(&mut self) -> Result<Revision> {
        Ok(self.adapter.current_revision()?)
    }

    pub fn ensure_metadata_tables(&mut self) -> Result<()> {
        ensure_metadata_tables(&mut self.adapter, &self.ctx.config)
    }

    /// Changes waiting to be pushed.
    pub fn pending_changes(&mut self) -> Result<ChangeSet> {
        self.ensure_metadata_tables()?;
        client_changes(&mut self.adapter, &self.ctx.config)
    }

    /// Insert or replace a row and flag it for the next push.
    pub fn record_local_change(&mut self, table: &str, pk: PrimaryKey, row: RowData) -> Result<()> {
        self.check_writable(table)?;
        if let Some(column) = self.adapter.primary_key_column(table)? {
            check_row_key(&row, &column, &pk).map_err(Error::Protocol)?;
        }
        self.ensure_metadata_tables()?;
        let ctx = &self.ctx;
        in_transaction(&mut self.adapter, |adapter| {
            let md = ctx.config.metadata_table(table);
            let base = adapter
                .get_metadata(&md, &pk)?
                .map_or(0, |meta| meta.entry.revision);
            write_row(adapter, table, &pk, Some(&row))?;
            let entry = MdEntry::live(table, pk.clone(), base, ctx.hasher.hash(Some(&row)));
            adapter.put_metadata(
                &md,
                &StoredMetadata {
                    entry,
                    modified: true,
                },
            )?;
            Ok(())
        })?;
        debug!("Recorded local change to {}/{}", table, pk);
        Ok(())
    }

    /// Delete a row and flag the tombstone for the next push.
    ///
    /// Returns false when neither the row nor its metadata existed.
    pub fn record_local_delete(&mut self, table: &str, pk: PrimaryKey) -> Result<bool> {
        self.check_writable(table)?;
        self.ensure_metadata_tables()?;
        let ctx = &self.ctx;
        let recorded = in_transaction(&mut self.adapter, |adapter| {
            let md = ctx.config.metadata_table(table);
            let prior = adapter.get_metadata(&md, &pk)?;
            let existed = adapter.delete_row(table, &pk)?;
            if !existed && prior.is_none() {
                return Ok(false);
            }
            let base = prior.map_or(0, |meta| meta.entry.revision);
            adapter.put_metadata(
                &md,
                &StoredMetadata {
                    entry: MdEntry::tombstone(table, pk.clone(), base),
                    modified: true,
                },
            )?;
            Ok(true)
        })?;
        if recorded {
            debug!("Recorded local delete of {}/{}", table, pk);
        }
        Ok(recorded)
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        let strategies = &self.ctx.config.strategies;
        if !strategies.contains(table) {
            return Err(Error::TableNotSynchronized(table.to_string()));
        }
        if !strategies.strategy(table).direction().sends_client_changes() {
            return Err(Error::Protocol(format!(
                "table {table} only receives server changes"
            )));
        }
        Ok(())
    }

    /// Fetch and apply server changes since the client revision.
    ///
    /// Server rows colliding with a pending local change are resolved here
    /// with the table's strategy. The client revision advances to the one the
    /// server returned.
    pub fn pull<S: SyncServer + ?Sized>(&mut self, server: &mut S) -> Result<PullReport> {
        let retries = self.ctx.config.get_changes_retries;
        with_retries(self, "pull", retries, |this| this.pull_once(&mut *server))
    }

    fn pull_once<S: SyncServer + ?Sized>(&mut self, server: &mut S) -> Result<PullReport> {
        self.ensure_metadata_tables()?;
        let since = self.adapter.current_revision()?;
        let set = server.get_changes(since)?;
        let ctx = &self.ctx;

        let report = in_transaction(&mut self.adapter, |adapter| {
            let mut report = PullReport {
                revision: set.revision.max(since),
                ..PullReport::default()
            };
            for change in &set.changes {
                pull_change(adapter, ctx, change, &mut report)?;
            }
            adapter.set_revision(report.revision)?;
            Ok(report)
        })?;

        info!(
            "Pulled {} changes since {} ({} conflicts), now at revision {}",
            report.applied,
            since,
            report.conflicts.len(),
            report.revision
        );
        Ok(report)
    }

    /// Send pending local changes to the server.
    ///
    /// On success the pushed rows lose their modified flag, unless they were
    /// edited again meanwhile. They keep the revision they were based on: the
    /// server may have kept its own row, and only a pull brings in what it
    /// stored at the batch revision.
    pub fn push<S: SyncServer + ?Sized>(&mut self, server: &mut S) -> Result<PushReport> {
        let set = self.pending_changes()?;
        if set.is_empty() {
            debug!("Nothing to push");
            return Ok(PushReport::default());
        }

        let revision = server.apply_changes(&set.changes, set.revision)?;
        let ctx = &self.ctx;
        in_transaction(&mut self.adapter, |adapter| {
            for change in &set.changes {
                settle_pushed(adapter, ctx, change, revision)?;
            }
            Ok(())
        })?;

        info!("Pushed {} changes as server revision {}", set.len(), revision);
        Ok(PushReport {
            pushed: set.len(),
            revision: Some(revision),
        })
    }

    /// One full round: validate, pull, push, and pull again if anything was
    /// pushed so the server's view of those rows comes back.
    pub fn sync<S: SyncServer + ?Sized>(&mut self, server: &mut S) -> Result<SyncReport> {
        server.validate(&self.ctx.config.strategies)?;
        self.ensure_metadata_tables()?;

        let pulled = self.pull(server)?;
        let pushed = self.push(server)?;
        let mut report = SyncReport {
            pulled: pulled.applied,
            pushed: pushed.pushed,
            conflicts: pulled.conflicts,
            revision: pulled.revision,
            server_revision: pushed.revision,
        };

        if pushed.pushed > 0 {
            let again = self.pull(server)?;
            report.pulled += again.applied;
            report.conflicts.extend(again.conflicts);
            report.revision = again.revision;
        }
        Ok(report)
    }
}

fn write_row<A: StorageAdapter + ?Sized>(
    adapter: &mut A,
    table: &str,
    pk: &PrimaryKey,
    row: Option<&RowData>,
) -> Result<()> {
    match row {
        Some(row) => {
            if !adapter.update_row(table, pk, row)? {
                adapter.insert_row(table, pk, row)?;
            }
        }
        None => {
            adapter.delete_row(table, pk)?;
        }
    }
    Ok(())
}

fn stamp(
    ctx: &SessionContext,
    table: &str,
    pk: &PrimaryKey,
    row: Option<&RowData>,
    revision: Revision,
    modified: bool,
) -> StoredMetadata {
    let entry = match row {
        Some(row) => MdEntry::live(table, pk.clone(), revision, ctx.hasher.hash(Some(row))),
        None => MdEntry::tombstone(table, pk.clone(), revision),
    };
    StoredMetadata { entry, modified }
}

fn pull_change<A: StorageAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &SessionContext,
    change: &Change,
    report: &mut PullReport,
) -> Result<()> {
    let table = change.table();
    let pk = change.primary_key();
    if !ctx.config.strategies.contains(table) {
        return Err(Error::TableNotSynchronized(table.to_string()));
    }
    change.check_invariant().map_err(Error::Protocol)?;

    let md = ctx.config.metadata_table(table);
    let server_revision = change.entry.revision;

    let meta = match adapter.get_metadata(&md, pk)? {
        Some(meta) if meta.modified => meta,
        _ => {
            write_row(adapter, table, pk, change.row.as_ref())?;
            adapter.put_metadata(&md, &stamp(ctx, table, pk, change.row.as_ref(), server_revision, false))?;
            report.applied += 1;
            return Ok(());
        }
    };

    if server_revision <= meta.entry.revision {
        debug!(
            "Keeping pending local change to {}/{} over server revision {}",
            table, pk, server_revision
        );
        return Ok(());
    }

    let local_row = if meta.entry.exists {
        adapter.get_row(table, pk)?
    } else {
        None
    };

    if let (Some(ours), Some(theirs)) = (local_row.as_ref(), change.row.as_ref()) {
        if ctx.hasher.hash(Some(ours)) == ctx.hasher.hash(Some(theirs)) {
            debug!("{}/{} already matches the server", table, pk);
            adapter.put_metadata(&md, &stamp(ctx, table, pk, Some(theirs), server_revision, false))?;
            report.applied += 1;
            return Ok(());
        }
    }

    let local = match local_row {
        Some(row) => Change::live(
            MdEntry::live(table, pk.clone(), meta.entry.revision, ctx.hasher.hash(Some(&row))),
            row,
        ),
        None => Change::deleted(MdEntry::tombstone(table, pk.clone(), meta.entry.revision)),
    };
    let data = ConflictHandlingData::new(local, meta.entry.revision, change.clone(), server_revision);
    let resolution = ctx.resolvers.resolve(&data)?;
    info!(
        "Conflict {} on {}/{} while pulling: {:?} wins",
        resolution.kind, table, pk, resolution.winner
    );

    // Anything other than the server's own row still has to be pushed.
    let modified = !rows_equal(resolution.row.as_ref(), change.row.as_ref());
    write_row(adapter, table, pk, resolution.row.as_ref())?;
    adapter.put_metadata(
        &md,
        &stamp(ctx, table, pk, resolution.row.as_ref(), server_revision, modified),
    )?;

    report.applied += 1;
    report.conflicts.push(ConflictRecord {
        table: table.to_string(),
        primary_key: pk.clone(),
        kind: resolution.kind,
        winner: resolution.winner,
    });
    Ok(())
}

fn settle_pushed<A: StorageAdapter + ?Sized>(
    adapter: &mut A,
    ctx: &SessionContext,
    change: &Change,
    revision: Revision,
) -> Result<()> {
    let table = change.table();
    let pk = change.primary_key();
    let md = ctx.config.metadata_table(table);

    let Some(meta) = adapter.get_metadata(&md, pk)? else {
        return Ok(());
    };
    let current = if meta.entry.exists {
        adapter.get_row(table, pk)?
    } else {
        None
    };
    let unchanged = match (current.as_ref(), change.row.as_ref()) {
        (None, None) => !meta.entry.exists,
        (Some(now), Some(_)) => ctx.hasher.hash(Some(now)) == change.entry.mdv,
        _ => false,
    };

    if !unchanged {
        debug!("{}/{} changed during push, keeping it flagged", table, pk);
        return Ok(());
    }
    debug!("{}/{} settled by server revision {}", table, pk, revision);
    adapter.put_metadata(
        &md,
        &StoredMetadata {
            entry: meta.entry,
            modified: false,
        },
    )?;
    Ok(())
}
