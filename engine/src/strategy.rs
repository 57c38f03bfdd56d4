//! Per-table sync direction and conflict strategy.
//!
//! A [`TableSyncStrategy`] can only be built from a compatible pair, so an
//! invalid combination is rejected when the configuration is assembled rather
//! than in the middle of a synchronization.

use crate::{error::Result, Error, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which way changes flow for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncDirection {
    ClientToServer,
    ServerToClient,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    /// Whether client changes are accepted by the server.
    pub fn sends_client_changes(self) -> bool {
        self != SyncDirection::ServerToClient
    }

    /// Whether server changes are delivered to clients.
    pub fn sends_server_changes(self) -> bool {
        self != SyncDirection::ClientToServer
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::ClientToServer => write!(f, "CLIENT_TO_SERVER"),
            SyncDirection::ServerToClient => write!(f, "SERVER_TO_CLIENT"),
            SyncDirection::Bidirectional => write!(f, "BIDIRECTIONAL"),
        }
    }
}

/// How conflicting edits are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    ClientWins,
    #[default]
    ServerWins,
    FireEvent,
}

impl ConflictStrategy {
    /// Whether this strategy can be paired with `direction`.
    pub fn allowed_with(self, direction: SyncDirection) -> bool {
        match (direction, self) {
            (SyncDirection::Bidirectional, _) => true,
            (SyncDirection::ClientToServer, ConflictStrategy::ClientWins) => true,
            (SyncDirection::ServerToClient, ConflictStrategy::ServerWins) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::ClientWins => write!(f, "CLIENT_WINS"),
            ConflictStrategy::ServerWins => write!(f, "SERVER_WINS"),
            ConflictStrategy::FireEvent => write!(f, "FIRE_EVENT"),
        }
    }
}

/// Direction and conflict strategy for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawStrategy")]
pub struct TableSyncStrategy {
    direction: SyncDirection,
    conflict_strategy: ConflictStrategy,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStrategy {
    direction: SyncDirection,
    conflict_strategy: ConflictStrategy,
}

impl TryFrom<RawStrategy> for TableSyncStrategy {
    type Error = Error;

    fn try_from(raw: RawStrategy) -> Result<Self> {
        TableSyncStrategy::new(raw.direction, raw.conflict_strategy)
    }
}

impl TableSyncStrategy {
    /// Build a strategy, rejecting incompatible combinations.
    pub fn new(direction: SyncDirection, conflict_strategy: ConflictStrategy) -> Result<Self> {
        if !conflict_strategy.allowed_with(direction) {
            return Err(Error::Config(format!(
                "conflict strategy {conflict_strategy} cannot be used with direction {direction}"
            )));
        }
        Ok(Self {
            direction,
            conflict_strategy,
        })
    }

    pub fn direction(&self) -> SyncDirection {
        self.direction
    }

    pub fn conflict_strategy(&self) -> ConflictStrategy {
        self.conflict_strategy
    }
}

impl Default for TableSyncStrategy {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional,
            conflict_strategy: ConflictStrategy::ServerWins,
        }
    }
}

impl fmt::Display for TableSyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.direction, self.conflict_strategy)
    }
}

/// Strategies of all synchronized tables.
///
/// The key set is the set of synchronized tables. Tables listed without an
/// explicit strategy use the default one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncStrategies {
    default: TableSyncStrategy,
    tables: BTreeMap<TableName, Option<TableSyncStrategy>>,
}

impl TableSyncStrategies {
    pub fn new(default: TableSyncStrategy) -> Self {
        Self {
            default,
            tables: BTreeMap::new(),
        }
    }

    /// Synchronize `table` with the default strategy.
    pub fn with_table(mut self, table: impl Into<TableName>) -> Self {
        self.tables.entry(table.into()).or_insert(None);
        self
    }

    /// Synchronize `table` with an explicit strategy.
    pub fn with_strategy(mut self, table: impl Into<TableName>, strategy: TableSyncStrategy) -> Self {
        self.tables.insert(table.into(), Some(strategy));
        self
    }

    pub fn default_strategy(&self) -> TableSyncStrategy {
        self.default
    }

    /// Effective strategy for `table`, falling back to the default.
    pub fn strategy(&self, table: &str) -> TableSyncStrategy {
        self.tables
            .get(table)
            .copied()
            .flatten()
            .unwrap_or(self.default)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Synchronized tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Whether any table resolves conflicts through a handler.
    pub fn uses_fire_event(&self) -> bool {
        self.tables()
            .any(|t| self.strategy(t).conflict_strategy() == ConflictStrategy::FireEvent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_combinations() {
        use ConflictStrategy::*;
        use SyncDirection::*;

        assert!(TableSyncStrategy::new(Bidirectional, ClientWins).is_ok());
        assert!(TableSyncStrategy::new(Bidirectional, ServerWins).is_ok());
        assert!(TableSyncStrategy::new(Bidirectional, FireEvent).is_ok());
        assert!(TableSyncStrategy::new(ClientToServer, ClientWins).is_ok());
        assert!(TableSyncStrategy::new(ServerToClient, ServerWins).is_ok());
    }

    #[test]
    fn incompatible_combinations_fail_fast() {
        use ConflictStrategy::*;
        use SyncDirection::*;

        for (direction, strategy) in [
            (ClientToServer, ServerWins),
            (ClientToServer, FireEvent),
            (ServerToClient, ClientWins),
            (ServerToClient, FireEvent),
        ] {
            let err = TableSyncStrategy::new(direction, strategy).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{direction}/{strategy}");
        }
    }

    #[test]
    fn fallback_to_default() {
        let explicit =
            TableSyncStrategy::new(SyncDirection::ClientToServer, ConflictStrategy::ClientWins)
                .unwrap();
        let strategies = TableSyncStrategies::default()
            .with_table("items")
            .with_strategy("logs", explicit);

        assert_eq!(strategies.strategy("items"), TableSyncStrategy::default());
        assert_eq!(strategies.strategy("logs"), explicit);
        assert!(strategies.contains("items"));
        assert!(!strategies.contains("users"));
        assert_eq!(
            strategies.tables().cloned().collect::<Vec<_>>(),
            vec!["items".to_string(), "logs".to_string()]
        );
    }

    #[test]
    fn deserialization_rejects_incompatible_pair() {
        let ok: TableSyncStrategy =
            serde_json::from_str(r#"{"direction":"BIDIRECTIONAL","conflictStrategy":"FIRE_EVENT"}"#)
                .unwrap();
        assert_eq!(ok.conflict_strategy(), ConflictStrategy::FireEvent);

        let bad = serde_json::from_str::<TableSyncStrategy>(
            r#"{"direction":"SERVER_TO_CLIENT","conflictStrategy":"CLIENT_WINS"}"#,
        );
        assert!(bad.is_err());
    }
}
