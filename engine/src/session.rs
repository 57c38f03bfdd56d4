//! Plumbing shared by the server and client sessions: per-session context,
//! metadata table bootstrap, the whole-call retry loop and transaction scope.

use crate::config::SyncConfig;
use crate::hasher::ContentHasher;
use crate::resolver::{ConflictHandler, Resolvers};
use crate::storage::{FailureKind, StorageAdapter};
use crate::{error::Result, Error};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a session derives from its configuration up front.
#[derive(Debug, Clone)]
pub(crate) struct SessionContext {
    pub(crate) config: SyncConfig,
    pub(crate) resolvers: Resolvers,
    pub(crate) hasher: ContentHasher,
}

impl SessionContext {
    pub(crate) fn new(config: SyncConfig, handler: Option<Arc<dyn ConflictHandler>>) -> Result<Self> {
        if config.metadata_suffix.is_empty() {
            return Err(Error::Config("metadata table suffix must not be empty".into()));
        }
        let resolvers = Resolvers::new(&config.strategies, handler)?;
        let hasher = config.hasher();
        Ok(Self {
            config,
            resolvers,
            hasher,
        })
    }
}

/// Make sure every synchronized table has its metadata table.
///
/// Creation races with other sessions bootstrapping the same table: a
/// uniqueness or transient failure means someone else is creating it, so the
/// check is repeated up to `bootstrap_retries` times.
pub fn ensure_metadata_tables<A>(adapter: &mut A, config: &SyncConfig) -> Result<()>
where
    A: StorageAdapter + ?Sized,
{
    for table in config.strategies.tables() {
        let md = config.metadata_table(table);
        let mut retries_left = config.bootstrap_retries;
        let mut attempts = 0;

        loop {
            attempts += 1;
            if adapter.metadata_table_exists(&md)? {
                break;
            }
            match adapter.create_metadata_table(&md) {
                Ok(()) => {
                    info!("Created metadata table {} for {}", md.name, table);
                    break;
                }
                Err(e) if matches!(e.kind, FailureKind::Transient | FailureKind::Uniqueness) => {
                    if retries_left == 0 {
                        warn!("Giving up creating metadata table {}: {}", md.name, e);
                        return Err(Error::RetriesExhausted {
                            operation: "metadata table bootstrap",
                            attempts,
                        });
                    }
                    retries_left -= 1;
                    warn!(
                        "Concurrent creation of {} ({}), rechecking; {} retries left",
                        md.name, e, retries_left
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or the
/// retry budget is spent.
pub(crate) fn with_retries<S, T>(
    state: &mut S,
    operation: &'static str,
    retries: u32,
    mut attempt: impl FnMut(&mut S) -> Result<T>,
) -> Result<T> {
    let mut retries_left = retries;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(state) {
            Err(e) if e.is_transient() => {
                if retries_left == 0 {
                    warn!("{} failed after {} attempts: {}", operation, attempts, e);
                    return Err(Error::RetriesExhausted {
                        operation,
                        attempts,
                    });
                }
                retries_left -= 1;
                warn!(
                    "{} hit a transient failure ({}), retrying; {} retries left",
                    operation, e, retries_left
                );
            }
            other => return other,
        }
    }
}

/// Run `body` inside one transaction, committing on success and rolling back
/// on any error.
pub(crate) fn in_transaction<A, T>(adapter: &mut A, body: impl FnOnce(&mut A) -> Result<T>) -> Result<T>
where
    A: StorageAdapter + ?Sized,
{
    adapter.begin()?;
    let result = body(adapter).and_then(|value| {
        adapter.commit()?;
        Ok(value)
    });
    if result.is_err() {
        if let Err(e) = adapter.rollback() {
            warn!("Rollback failed: {}", e);
        }
    }
    result
}
