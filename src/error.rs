//! Error taxonomy for migration reconciliation and application.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::migration::MigrationId;

/// Result alias used across the library.
pub type LiftResult<T> = Result<T, LiftError>;

/// Every fatal condition an up/down/save/watch invocation can hit.
#[derive(Debug, Error)]
pub enum LiftError {
    /// Local and remote disagree at the same position in the history.
    #[error(
        "Local and remote migrations are not in lockstep. We have migration {local} locally and {remote} remotely at position {position} in the history."
    )]
    LockstepViolation {
        position: usize,
        local: MigrationId,
        remote: MigrationId,
    },

    /// The database has applied more permanent migrations than exist locally.
    #[error(
        "There are more migrations in the database than locally. Local migration ids: {}. Remote migration ids: {}",
        join_ids(local),
        join_ids(remote)
    )]
    HistoryInversion {
        local: Vec<MigrationId>,
        remote: Vec<MigrationId>,
    },

    #[error(
        "There's a merge conflict in the {} file. Resolve it before running lift again.",
        path.display()
    )]
    LockConflict { path: PathBuf },

    #[error(
        "Your filter n = {selector} does not match any {target} migration. Please provide a valid <dec|name|timestamp>."
    )]
    InvalidSelector {
        selector: String,
        target: &'static str,
    },

    #[error("Rolled back migration {id}. {payload}")]
    MigrationRolledBack { id: MigrationId, payload: String },

    #[error("Failed to roll back migration {id}. {payload}")]
    RollbackFailed { id: MigrationId, payload: String },

    #[error("Errors during rollback of {id}: {errors}")]
    UnapplyFailed { id: MigrationId, errors: String },

    #[error(
        "Before running lift down, please save your {count} dev migration(s) using lift save and lift up"
    )]
    PendingLiveMigrations { count: usize },

    #[error("Hook {} of migration {id} failed: {reason}", path.display())]
    HookFailed {
        id: MigrationId,
        path: PathBuf,
        reason: String,
    },

    #[error("Migration {id} did not reach a terminal status within {waited:?}")]
    ProgressTimeout { id: MigrationId, waited: Duration },

    #[error(
        "{} uses the old list-only steps format - please delete your migrations folder and run lift save again",
        path.display()
    )]
    LegacyStepsFormat { path: PathBuf },

    #[error("{} has unsupported steps format version {version:?}", path.display())]
    UnsupportedStepsVersion { path: PathBuf, version: String },

    #[error("Malformed migration {}: {reason}", path.display())]
    MalformedMigration { path: PathBuf, reason: String },

    #[error("Invalid migration id {0:?}")]
    InvalidMigrationId(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl LiftError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LiftError::Io {
            path: path.into(),
            source,
        }
    }
}

fn join_ids(ids: &[MigrationId]) -> String {
    ids.iter()
        .map(MigrationId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
