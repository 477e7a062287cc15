//! Migration Record Store.
//!
//! Layout of a migrations directory:
//!
//! ```text
//! migrations/
//!   lift.lock
//!   20200101120000-init/
//!     steps.json      {"version": "1", "steps": [...]}
//!     schema.lift     full schema snapshot
//!     README.md       change summary
//!     before.sh       optional pre-hook
//!     after.sh        optional post-hook
//!   dev/              ephemeral (live) migrations, same layout
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LiftError, LiftResult};
use crate::migration::{DatamodelStep, LocalMigrationWithDatabaseSteps, Migration, MigrationId};

pub const STEPS_FILE: &str = "steps.json";
pub const SCHEMA_FILE: &str = "schema.lift";
pub const README_FILE: &str = "README.md";
pub const BEFORE_HOOK_FILE: &str = "before.sh";
pub const AFTER_HOOK_FILE: &str = "after.sh";
/// Ephemeral migrations live here, below the permanent migrations dir.
pub const DEV_DIR: &str = "dev";

/// Current `steps.json` format version. Anything else is rejected.
pub const STEPS_FORMAT_VERSION: &str = "1";

/// Versioned steps document persisted as `steps.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsDocument {
    pub version: String,
    pub steps: Vec<DatamodelStep>,
}

impl StepsDocument {
    pub fn new(steps: Vec<DatamodelStep>) -> Self {
        Self {
            version: STEPS_FORMAT_VERSION.to_string(),
            steps,
        }
    }

    pub fn parse(path: &Path, content: &str) -> LiftResult<Self> {
        let malformed = |reason: String| LiftError::MalformedMigration {
            path: path.to_path_buf(),
            reason,
        };

        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?;
        let map = match value {
            serde_json::Value::Array(_) => {
                return Err(LiftError::LegacyStepsFormat {
                    path: path.to_path_buf(),
                });
            }
            serde_json::Value::Object(map) => map,
            _ => return Err(malformed("expected a JSON object".into())),
        };

        let version = match map.get("version") {
            Some(serde_json::Value::String(v)) => v.clone(),
            Some(other) => other.to_string(),
            None => return Err(malformed("missing .version property".into())),
        };
        if version != STEPS_FORMAT_VERSION {
            return Err(LiftError::UnsupportedStepsVersion {
                path: path.to_path_buf(),
                version,
            });
        }

        let steps = map
            .get("steps")
            .cloned()
            .ok_or_else(|| malformed("expected to have a .steps property".into()))?;
        let steps = serde_json::from_value(steps).map_err(|e| malformed(e.to_string()))?;
        Ok(Self { version, steps })
    }

    pub fn to_json(&self) -> LiftResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// File name to content, as written into one migration directory.
pub type FileMap = BTreeMap<&'static str, String>;

/// Reads and writes one migrations directory (permanent or ephemeral).
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: PathBuf,
}

impl MigrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The ephemeral store nested inside a permanent migrations dir.
    pub fn dev(migrations_dir: &Path) -> Self {
        Self::new(migrations_dir.join(DEV_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All migrations in ascending id order. A missing directory is empty.
    pub fn load(&self) -> LiftResult<Vec<Migration>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LiftError::io(&self.dir, e)),
        };

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| LiftError::io(&self.dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == DEV_DIR || name.starts_with('.') {
                continue;
            }
            let Ok(id) = MigrationId::parse(&name) else {
                warn!(dir = %path.display(), "skipping directory with invalid migration id");
                continue;
            };
            if let Some(migration) = load_migration(&path, id)? {
                migrations.push(migration);
            }
        }

        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(dir = %self.dir.display(), count = migrations.len(), "loaded migrations");
        Ok(migrations)
    }

    /// Write `files` into `<dir>/<id>/`, creating it if needed.
    pub fn write(&self, id: &MigrationId, files: &FileMap) -> LiftResult<PathBuf> {
        let target = self.dir.join(id.as_str());
        std::fs::create_dir_all(&target).map_err(|e| LiftError::io(&target, e))?;
        for (name, content) in files {
            let path = target.join(name);
            std::fs::write(&path, content).map_err(|e| LiftError::io(&path, e))?;
        }
        Ok(target)
    }

    /// Delete the whole directory. Used to discard ephemeral history.
    pub fn clear(&self) -> LiftResult<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LiftError::io(&self.dir, e)),
        }
    }

    pub fn ensure_exists(&self) -> LiftResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| LiftError::io(&self.dir, e))
    }
}

fn load_migration(dir: &Path, id: MigrationId) -> LiftResult<Option<Migration>> {
    let steps_path = dir.join(STEPS_FILE);
    let steps_content = match std::fs::read_to_string(&steps_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "skipping directory without {}", STEPS_FILE);
            return Ok(None);
        }
        Err(e) => return Err(LiftError::io(&steps_path, e)),
    };
    let document = StepsDocument::parse(&steps_path, &steps_content)?;

    let schema_path = dir.join(SCHEMA_FILE);
    let datamodel = std::fs::read_to_string(&schema_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LiftError::MalformedMigration {
                path: dir.to_path_buf(),
                reason: format!("missing {}", SCHEMA_FILE),
            }
        } else {
            LiftError::io(&schema_path, e)
        }
    })?;

    let hook = |name: &str| {
        let path = dir.join(name);
        path.is_file().then_some(path)
    };

    Ok(Some(Migration {
        id,
        datamodel_steps: document.steps,
        datamodel,
        before_hook: hook(BEFORE_HOOK_FILE),
        after_hook: hook(AFTER_HOOK_FILE),
    }))
}

/// Files persisted for a migration: steps, schema snapshot and README.
pub fn migration_file_map(
    migration: &LocalMigrationWithDatabaseSteps,
    last: Option<&Migration>,
) -> LiftResult<FileMap> {
    let mut files = FileMap::new();
    files.insert(
        STEPS_FILE,
        StepsDocument::new(migration.migration.datamodel_steps.clone()).to_json()?,
    );
    files.insert(SCHEMA_FILE, migration.migration.datamodel.clone());
    files.insert(README_FILE, render_readme(migration, last));
    Ok(files)
}

/// Human-readable change summary for a migration directory.
pub fn render_readme(migration: &LocalMigrationWithDatabaseSteps, last: Option<&Migration>) -> String {
    let id = migration.id();
    let last_id = last.map(|m| m.id.as_str()).unwrap_or("");
    let before = last.map(|m| m.datamodel.as_str()).unwrap_or("");

    let mut out = format!("# Migration `{}`\n\n", id);
    out.push_str(&format!(
        "This migration has been generated by lift from the previous migration `{}`.\n\n",
        if last_id.is_empty() { "(none)" } else { last_id }
    ));

    out.push_str("## Changes\n\n```diff\n");
    out.push_str(&format!("migration {}..{}\n", last_id, id));
    out.push_str(&format!("--- {}\n+++ {}\n", SCHEMA_FILE, SCHEMA_FILE));
    out.push_str(&line_diff(before, &migration.migration.datamodel));
    out.push_str("```\n\n");

    out.push_str("## Database steps\n\n```sql\n");
    for step in &migration.database_steps {
        out.push_str(step.raw.trim_end_matches(';'));
        out.push_str(";\n");
    }
    out.push_str("```\n");
    out
}

/// Line diff of two texts, `-`/`+`/` ` prefixed.
fn line_diff(before: &str, after: &str) -> String {
    let a: Vec<&str> = before.lines().collect();
    let b: Vec<&str> = after.lines().collect();
    let (n, m) = (a.len(), b.len());

    // lcs[i][j]: longest common subsequence of a[i..] and b[j..].
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = String::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push_str(&format!(" {}\n", a[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push_str(&format!("-{}\n", a[i]));
            i += 1;
        } else {
            out.push_str(&format!("+{}\n", b[j]));
            j += 1;
        }
    }
    for line in &a[i..] {
        out.push_str(&format!("-{}\n", line));
    }
    for line in &b[j..] {
        out.push_str(&format!("+{}\n", line));
    }
    out
}
