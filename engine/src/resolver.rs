//! Conflict resolution strategies.
//!
//! Each table's [`ConflictStrategy`] selects one resolver. A resolver decides
//! the row data that survives a classified conflict; `None` means the row
//! ends up deleted. Resolvers run inside the caller's open transaction.

use crate::conflict::{ConflictHandlingData, ConflictKind};
use crate::metadata::RowData;
use crate::strategy::{ConflictStrategy, SyncDirection, TableSyncStrategies};
use crate::{error::Result, Error};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which side's data survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Winner {
    Client,
    Server,
    /// Data chosen (or merged) by a [`ConflictHandler`]
    Handler,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub kind: ConflictKind,
    pub winner: Winner,
    /// Surviving row data; `None` when the row is deleted
    pub row: Option<RowData>,
}

/// Decision callback used by `FIRE_EVENT` tables.
///
/// Receives both sides and returns the row data to keep, or `None` to delete
/// the row. It may be called more than once for the same conflict when a
/// batch is retried.
pub trait ConflictHandler: Send + Sync {
    fn resolve(&self, kind: ConflictKind, data: &ConflictHandlingData) -> Result<Option<RowData>>;
}

impl<F> ConflictHandler for F
where
    F: Fn(ConflictKind, &ConflictHandlingData) -> Result<Option<RowData>> + Send + Sync,
{
    fn resolve(&self, kind: ConflictKind, data: &ConflictHandlingData) -> Result<Option<RowData>> {
        self(kind, data)
    }
}

/// A conflict resolution strategy.
pub trait ConflictResolver {
    /// Resolve `data` for a table synchronized in `direction`.
    ///
    /// Returns [`Error::InternalDefect`] when `direction` makes the conflict
    /// impossible for this strategy.
    fn resolve(&self, data: &ConflictHandlingData, direction: SyncDirection) -> Result<Resolution>;
}

fn illegal(strategy: ConflictStrategy, direction: SyncDirection, data: &ConflictHandlingData) -> Error {
    Error::InternalDefect(format!(
        "{strategy} resolver invoked for {}/{} under {direction}",
        data.table(),
        data.primary_key()
    ))
}

/// The client's version survives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientWins;

impl ConflictResolver for ClientWins {
    fn resolve(&self, data: &ConflictHandlingData, direction: SyncDirection) -> Result<Resolution> {
        if direction == SyncDirection::ServerToClient {
            return Err(illegal(ConflictStrategy::ClientWins, direction, data));
        }
        Ok(Resolution {
            kind: data.kind(),
            winner: Winner::Client,
            row: data.local.row.clone(),
        })
    }
}

/// The server's version survives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictResolver for ServerWins {
    fn resolve(&self, data: &ConflictHandlingData, direction: SyncDirection) -> Result<Resolution> {
        if direction == SyncDirection::ClientToServer {
            return Err(illegal(ConflictStrategy::ServerWins, direction, data));
        }
        Ok(Resolution {
            kind: data.kind(),
            winner: Winner::Server,
            row: data.remote.row.clone(),
        })
    }
}

/// Delegates the decision to a [`ConflictHandler`].
#[derive(Clone)]
pub struct FireEvent {
    handler: Arc<dyn ConflictHandler>,
}

impl FireEvent {
    pub fn new(handler: Arc<dyn ConflictHandler>) -> Self {
        Self { handler }
    }
}

impl fmt::Debug for FireEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireEvent").finish_non_exhaustive()
    }
}

impl ConflictResolver for FireEvent {
    fn resolve(&self, data: &ConflictHandlingData, direction: SyncDirection) -> Result<Resolution> {
        if direction != SyncDirection::Bidirectional {
            return Err(illegal(ConflictStrategy::FireEvent, direction, data));
        }
        let kind = data.kind();
        let row = self.handler.resolve(kind, data)?;
        Ok(Resolution {
            kind,
            winner: Winner::Handler,
            row,
        })
    }
}

/// Resolvers for every synchronized table of a session.
///
/// Built once before any data moves; a `FIRE_EVENT` table without a handler
/// is rejected here.
#[derive(Debug, Clone)]
pub struct Resolvers {
    strategies: TableSyncStrategies,
    fire_event: Option<FireEvent>,
}

impl Resolvers {
    pub fn new(
        strategies: &TableSyncStrategies,
        handler: Option<Arc<dyn ConflictHandler>>,
    ) -> Result<Self> {
        if strategies.uses_fire_event() && handler.is_none() {
            return Err(Error::Config(
                "a FIRE_EVENT table requires a conflict handler".to_string(),
            ));
        }
        Ok(Self {
            strategies: strategies.clone(),
            fire_event: handler.map(FireEvent::new),
        })
    }

    /// Resolve a conflict with the strategy of its table.
    pub fn resolve(&self, data: &ConflictHandlingData) -> Result<Resolution> {
        let strategy = self.strategies.strategy(data.table());
        let direction = strategy.direction();
        let resolution = match strategy.conflict_strategy() {
            ConflictStrategy::ClientWins => ClientWins.resolve(data, direction),
            ConflictStrategy::ServerWins => ServerWins.resolve(data, direction),
            ConflictStrategy::FireEvent => match &self.fire_event {
                Some(fire_event) => fire_event.resolve(data, direction),
                None => Err(Error::InternalDefect(format!(
                    "no conflict handler for FIRE_EVENT table {}",
                    data.table()
                ))),
            },
        }?;
        debug!(
            "Resolved {} on {}/{}: {:?} wins",
            resolution.kind,
            data.table(),
            data.primary_key(),
            resolution.winner
        );
        Ok(resolution)
    }
}
