//! Roll back applied migrations.

use std::fmt;
use std::time::Duration;

use super::{count_migrations, format_elapsed, Lift};
use crate::engine::MigrationEngine;
use crate::error::{LiftError, LiftResult};
use crate::migration::MigrationId;
use crate::rollback::RollbackController;
use crate::selector::Selector;

#[derive(Debug, Clone, Default)]
pub struct DownOptions {
    /// Defaults to `1`, the most recent applied migration.
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownSummary {
    /// Most recent first.
    pub rolled_back: Vec<MigrationId>,
    pub elapsed: Duration,
}

impl fmt::Display for DownSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rolled_back.is_empty() {
            return f.write_str("No migration to roll back");
        }
        write!(
            f,
            "Rolled back {} in {}",
            count_migrations(self.rolled_back.len()),
            format_elapsed(self.elapsed)
        )
    }
}

impl<E> Lift<E>
where
    E: MigrationEngine,
{
    pub async fn down(&self, options: DownOptions) -> LiftResult<DownSummary> {
        let started = self.clock.elapsed();

        let live = self.dev_store().load()?.len();
        if live > 0 {
            return Err(LiftError::PendingLiveMigrations { count: live });
        }

        let (_lock, local) = self.load_local()?;
        let source_config = self.read_schema()?;
        let selector = options.selector.unwrap_or_else(|| Selector::new("1"));

        let summary = RollbackController::new(&*self.engine, &*self.reporter)
            .rollback(&local, live, &selector, &source_config)
            .await?;

        Ok(DownSummary {
            rolled_back: summary.rolled_back,
            elapsed: self.clock.elapsed().saturating_sub(started),
        })
    }
}
