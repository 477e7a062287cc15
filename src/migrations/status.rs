//! Local history against the database.

use std::fmt;

use colored::*;

use super::Lift;
use crate::engine::MigrationEngine;
use crate::error::LiftResult;
use crate::migration::MigrationId;
use crate::reconcile::reconcile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Applied,
    Pending,
    /// Ephemeral migration in the dev directory.
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub id: MigrationId,
    pub status: MigrationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return f.write_str("No migrations yet. Run lift save to create one.");
        }
        for entry in &self.entries {
            let marker = match entry.status {
                MigrationStatus::Applied => "✓ applied".green(),
                MigrationStatus::Pending => "○ pending".yellow(),
                MigrationStatus::Live => "~ live".dimmed(),
            };
            writeln!(f, "  {}  {}", marker, entry.id)?;
        }
        write!(
            f,
            "{} applied, {} pending, {} live",
            self.count(MigrationStatus::Applied),
            self.count(MigrationStatus::Pending),
            self.count(MigrationStatus::Live)
        )
    }
}

impl<E> Lift<E>
where
    E: MigrationEngine,
{
    pub async fn status(&self) -> LiftResult<StatusReport> {
        let (_lock, local) = self.load_local()?;
        let live = self.dev_store().load()?;
        let source_config = self.read_schema()?;
        let remote = self.list_remote(&source_config).await?;
        let reconciliation = reconcile(&local, &remote, MigrationId::is_ephemeral)?;

        let entry = |id: &MigrationId, status| StatusEntry {
            id: id.clone(),
            status,
        };
        let entries = reconciliation
            .applied
            .iter()
            .map(|m| entry(&m.id, MigrationStatus::Applied))
            .chain(
                reconciliation
                    .pending
                    .iter()
                    .map(|m| entry(&m.id, MigrationStatus::Pending)),
            )
            .chain(live.iter().map(|m| entry(&m.id, MigrationStatus::Live)))
            .collect();

        Ok(StatusReport { entries })
    }
}
