//! Lock State Manager.
//!
//! `migrations/lift.lock` lists the ids of the canonical local history, one
//! per line. Git conflict markers in the file split it into a local and a
//! remote branch; a remote branch means an unresolved merge and every
//! reconciliation refuses to run until it is fixed by hand.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{LiftError, LiftResult};
use crate::migration::{Migration, MigrationId};

pub const LOCK_FILE_NAME: &str = "lift.lock";

const HEADER: &str = "# lift lockfile v1\n# Do not edit this file by hand. If git reports a conflict here, keep both\n# branches' migrations in timestamp order and remove the conflict markers.\n";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFile {
    pub local_migrations: Vec<MigrationId>,
    /// Ids between `<<<<<<<` and `=======`.
    pub local_branch: Option<Vec<MigrationId>>,
    /// Ids between `=======` and `>>>>>>>`.
    pub remote_branch: Option<Vec<MigrationId>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Common,
    Ours,
    Theirs,
}

impl LockFile {
    pub fn parse(content: &str) -> LiftResult<Self> {
        let mut lock = LockFile::default();
        let mut section = Section::Common;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("<<<<<<<") {
                section = Section::Ours;
                lock.local_branch.get_or_insert_with(Vec::new);
                continue;
            }
            if line.starts_with("=======") {
                section = Section::Theirs;
                lock.remote_branch.get_or_insert_with(Vec::new);
                continue;
            }
            if line.starts_with(">>>>>>>") {
                section = Section::Common;
                continue;
            }

            let id = MigrationId::parse(line)?;
            match section {
                Section::Common => lock.local_migrations.push(id),
                Section::Ours => lock.local_branch.get_or_insert_with(Vec::new).push(id),
                Section::Theirs => lock.remote_branch.get_or_insert_with(Vec::new).push(id),
            }
        }

        Ok(lock)
    }

    pub fn serialize(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for id in &self.local_migrations {
            out.push_str(id.as_str());
            out.push('\n');
        }
        out
    }

    pub fn has_conflict(&self) -> bool {
        self.remote_branch.is_some()
    }

    pub fn push(&mut self, id: MigrationId) {
        if !self.local_migrations.contains(&id) {
            self.local_migrations.push(id);
        }
    }

    /// Warn about migrations on disk the lock file does not know about.
    pub fn report_untracked(&self, migrations: &[Migration]) -> Vec<MigrationId> {
        let untracked: Vec<MigrationId> = migrations
            .iter()
            .filter(|m| !self.local_migrations.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();
        if !untracked.is_empty() {
            warn!(?untracked, "migrations missing from {}", LOCK_FILE_NAME);
        }
        untracked
    }
}

/// Reads and writes the lock file of one migrations directory.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    pub fn new(migrations_dir: &Path) -> Self {
        Self {
            path: migrations_dir.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the lock state, refusing to continue on an unresolved conflict.
    /// A missing file is an empty history.
    pub fn load(&self) -> LiftResult<LockFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LockFile::default()),
            Err(e) => return Err(LiftError::io(&self.path, e)),
        };
        let lock = LockFile::parse(&content)?;
        if lock.has_conflict() {
            return Err(LiftError::LockConflict {
                path: self.path.clone(),
            });
        }
        Ok(lock)
    }

    pub fn save(&self, lock: &LockFile) -> LiftResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LiftError::io(parent, e))?;
        }
        std::fs::write(&self.path, lock.serialize()).map_err(|e| LiftError::io(&self.path, e))
    }
}
