//! Classification of conflicting edits.
//!
//! "Local" is always the client's pending change and "remote" the server's
//! state for the same primary key. The classifier only says what kind of
//! conflict a pair is; which side wins is the resolver's job.

use crate::metadata::{Change, PrimaryKey};
use crate::Revision;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed taxonomy of conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    LocalDelRemoteAddOrMod,
    LocalDelRemoteDel,
    LocalAddRemoteAddOrMod,
    LocalAddRemoteDel,
    LocalModRemoteAddOrMod,
    LocalModRemoteDel,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictKind::LocalDelRemoteAddOrMod => "LOCAL_DEL_REMOTE_ADD_OR_MOD",
            ConflictKind::LocalDelRemoteDel => "LOCAL_DEL_REMOTE_DEL",
            ConflictKind::LocalAddRemoteAddOrMod => "LOCAL_ADD_REMOTE_ADD_OR_MOD",
            ConflictKind::LocalAddRemoteDel => "LOCAL_ADD_REMOTE_DEL",
            ConflictKind::LocalModRemoteAddOrMod => "LOCAL_MOD_REMOTE_ADD_OR_MOD",
            ConflictKind::LocalModRemoteDel => "LOCAL_MOD_REMOTE_DEL",
        };
        f.write_str(name)
    }
}

/// What the local side did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalState {
    Added,
    Modified,
    Deleted,
}

/// A colliding pair of changes for one primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictHandlingData {
    /// The client's pending change
    pub local: Change,
    /// The server's current state
    pub remote: Change,
    /// Last server revision the client knew for this key; 0 if none
    pub local_revision: Revision,
    /// Server revision of `remote`
    pub remote_revision: Revision,
}

impl ConflictHandlingData {
    pub fn new(
        local: Change,
        local_revision: Revision,
        remote: Change,
        remote_revision: Revision,
    ) -> Self {
        Self {
            local,
            remote,
            local_revision,
            remote_revision,
        }
    }

    pub fn table(&self) -> &str {
        self.local.table()
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        self.local.primary_key()
    }

    pub fn local_state(&self) -> LocalState {
        if !self.local.entry.exists {
            LocalState::Deleted
        } else if self.local_revision == 0 {
            LocalState::Added
        } else {
            LocalState::Modified
        }
    }

    pub fn remote_deleted(&self) -> bool {
        !self.remote.entry.exists
    }

    pub fn kind(&self) -> ConflictKind {
        classify(self)
    }
}

/// Classify a colliding pair.
pub fn classify(data: &ConflictHandlingData) -> ConflictKind {
    match (data.local_state(), data.remote_deleted()) {
        (LocalState::Deleted, false) => ConflictKind::LocalDelRemoteAddOrMod,
        (LocalState::Deleted, true) => ConflictKind::LocalDelRemoteDel,
        (LocalState::Added, false) => ConflictKind::LocalAddRemoteAddOrMod,
        (LocalState::Added, true) => ConflictKind::LocalAddRemoteDel,
        (LocalState::Modified, false) => ConflictKind::LocalModRemoteAddOrMod,
        (LocalState::Modified, true) => ConflictKind::LocalModRemoteDel,
    }
}
