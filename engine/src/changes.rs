//! Enumeration of pending changes on either side.
//!
//! Both enumerators are read-only: they never touch revision or flag
//! columns. Any adapter failure aborts the scan and nothing is returned.

use crate::config::SyncConfig;
use crate::metadata::{compare_changes, Change, MdEntry};
use crate::storage::{StorageAdapter, StoredMetadata};
use crate::{error::Result, Revision};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Changes plus the revision token that goes with them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// For server changes, the revision to present on the next call; for
    /// client changes, the last server revision the client incorporated
    pub revision: Revision,
    /// Changes ordered by table, then primary key
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new(revision: Revision, changes: Vec<Change>) -> Self {
        Self { revision, changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Server rows changed after `since`, for every table whose direction
/// delivers server changes.
///
/// The returned revision is the highest revision seen, or `since` when
/// nothing changed.
pub fn server_changes<A>(adapter: &mut A, config: &SyncConfig, since: Revision) -> Result<ChangeSet>
where
    A: StorageAdapter + ?Sized,
{
    let mut max_revision = since;
    let mut changes = Vec::new();

    for table in config.strategies.tables() {
        if !config.strategies.strategy(table).direction().sends_server_changes() {
            continue;
        }
        let md = config.metadata_table(table);
        for meta in adapter.metadata_since(&md, since)? {
            max_revision = max_revision.max(meta.entry.revision);
            changes.push(load_change(adapter, meta, None)?);
        }
    }

    changes.sort_by(compare_changes);
    debug!(
        "Enumerated {} server changes since revision {} (new revision {})",
        changes.len(),
        since,
        max_revision
    );
    Ok(ChangeSet::new(max_revision, changes))
}

/// Client rows flagged as locally modified, for every table whose direction
/// accepts client changes.
///
/// Each change carries the server revision the row was last based on, so the
/// server can tell whether it moved on since. Digests are recomputed from the
/// live row.
pub fn client_changes<A>(adapter: &mut A, config: &SyncConfig) -> Result<ChangeSet>
where
    A: StorageAdapter + ?Sized,
{
    let revision = adapter.current_revision()?;
    let hasher = config.hasher();
    let mut changes = Vec::new();

    for table in config.strategies.tables() {
        if !config.strategies.strategy(table).direction().sends_client_changes() {
            continue;
        }
        let md = config.metadata_table(table);
        for meta in adapter.flagged_metadata(&md)? {
            let change = load_change(adapter, meta, Some(&hasher))?;
            changes.push(change);
        }
    }

    changes.sort_by(compare_changes);
    debug!(
        "Enumerated {} client changes at revision {}",
        changes.len(),
        revision
    );
    Ok(ChangeSet::new(revision, changes))
}

fn load_change<A>(
    adapter: &mut A,
    meta: StoredMetadata,
    rehash: Option<&crate::hasher::ContentHasher>,
) -> Result<Change>
where
    A: StorageAdapter + ?Sized,
{
    let mut entry = meta.entry;
    if !entry.exists {
        return Ok(Change::deleted(entry));
    }

    match adapter.get_row(&entry.table_name, &entry.primary_key)? {
        Some(row) => {
            if let Some(hasher) = rehash {
                entry.mdv = hasher.hash(Some(&row));
            }
            Ok(Change::live(entry, row))
        }
        None => {
            warn!(
                "Metadata for {}/{} marks a live row that is missing; sending a tombstone",
                entry.table_name, entry.primary_key
            );
            Ok(Change::deleted(MdEntry::tombstone(
                entry.table_name,
                entry.primary_key,
                entry.revision,
            )))
        }
    }
}
