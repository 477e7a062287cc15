//! Migration history data model.
//!
//! A migration is identified by a [`MigrationId`] of the form
//! `<YYYYMMDDHHMMSS>[-<name>]`. Ids sort lexicographically in creation
//! order, so sorting by id is sorting chronologically. Ephemeral (live)
//! migrations use the `watch-<YYYYMMDDHHMMSSmmm>` form and never enter the
//! permanent history.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LiftError, LiftResult};

/// Prefix shared by every ephemeral migration id.
pub const WATCH_PREFIX: &str = "watch-";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Live passes can be less than a second apart.
const WATCH_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Sortable migration identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    /// Validate an id read from disk, the lock file, or the executor.
    pub fn parse(raw: &str) -> LiftResult<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || raw
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(LiftError::InvalidMigrationId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Id for a permanent migration created at `at`, with an optional human name.
    pub fn new(at: DateTime<Utc>, name: Option<&str>) -> Self {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        match name.map(dashify).filter(|n| !n.is_empty()) {
            Some(name) => Self(format!("{}-{}", timestamp, name)),
            None => Self(timestamp),
        }
    }

    /// Id for an ephemeral migration synthesized by the live loop.
    pub fn watch(at: DateTime<Utc>) -> Self {
        Self(format!("{}{}", WATCH_PREFIX, at.format(WATCH_TIMESTAMP_FORMAT)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for ids produced by [`MigrationId::watch`].
    pub fn is_ephemeral(&self) -> bool {
        is_watch_migration_name(&self.0)
    }

    /// Timestamp part of the id. Leading all-digit dash segments form the
    /// timestamp, so both `20200101120000-init` and `2020-01-01-init` work.
    pub fn timestamp(&self) -> &str {
        self.split().0
    }

    /// Name part of the id, everything after the timestamp.
    pub fn name(&self) -> Option<&str> {
        self.split().1
    }

    fn split(&self) -> (&str, Option<&str>) {
        let body = self.0.strip_prefix(WATCH_PREFIX).unwrap_or(&self.0);
        let mut end = 0;
        for segment in body.split('-') {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                break;
            }
            end += segment.len() + 1;
        }
        if end == 0 {
            return ("", Some(body));
        }
        let timestamp = &body[..end - 1];
        let name = body.get(end..).filter(|n| !n.is_empty());
        (timestamp, name)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ephemeral-migration naming predicate used during reconciliation.
pub fn is_watch_migration_name(id: &str) -> bool {
    id.starts_with(WATCH_PREFIX)
}

/// Lower-case `name` and collapse every run of non-alphanumerics into one dash.
pub fn dashify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Abstract, engine-defined schema operation (e.g. "create field").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatamodelStep(pub serde_json::Value);

/// Concrete database operation computed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStep {
    /// Engine-specific step payload.
    pub step: serde_json::Value,
    /// Rendered statement, e.g. SQL.
    #[serde(default)]
    pub raw: String,
}

/// A migration recorded in the local history.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub id: MigrationId,
    pub datamodel_steps: Vec<DatamodelStep>,
    /// Full schema snapshot after this migration.
    pub datamodel: String,
    pub before_hook: Option<PathBuf>,
    pub after_hook: Option<PathBuf>,
}

impl Migration {
    pub fn new(id: MigrationId, datamodel: impl Into<String>, steps: Vec<DatamodelStep>) -> Self {
        Self {
            id,
            datamodel_steps: steps,
            datamodel: datamodel.into(),
            before_hook: None,
            after_hook: None,
        }
    }
}

/// A migration paired with the database steps computed for one apply run.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMigrationWithDatabaseSteps {
    pub migration: Migration,
    pub database_steps: Vec<DatabaseStep>,
}

impl LocalMigrationWithDatabaseSteps {
    pub fn id(&self) -> &MigrationId {
        &self.migration.id
    }
}

/// Status of a migration as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemoteMigrationStatus {
    Pending,
    MigrationInProgress,
    #[default]
    MigrationSuccess,
    RollingBack,
    RollbackSuccess,
    RollbackFailure,
}

/// A migration the executor reports as applied to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMigration {
    pub id: MigrationId,
    #[serde(default)]
    pub status: RemoteMigrationStatus,
}

impl RemoteMigration {
    pub fn applied(id: MigrationId) -> Self {
        Self {
            id,
            status: RemoteMigrationStatus::MigrationSuccess,
        }
    }
}
