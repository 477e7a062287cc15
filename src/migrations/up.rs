//! Apply pending migrations forward.

use std::fmt;
use std::time::Duration;

use tracing::info;

use super::{count_migrations, format_elapsed, Lift};
use crate::accumulate::accumulate;
use crate::engine::MigrationEngine;
use crate::error::LiftResult;
use crate::migration::{LocalMigrationWithDatabaseSteps, MigrationId};
use crate::reconcile::{reconcile, select_pending};
use crate::report::{Reporter, SilentReporter};
use crate::selector::Selector;

#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Apply pending migrations up to and including the match.
    pub selector: Option<Selector>,
    /// Compute and show database steps without submitting anything.
    pub preview: bool,
    /// Report nothing while applying.
    pub short: bool,
    /// Include the raw database steps in the summary.
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpSummary {
    /// Applied (or, in preview, planned) migrations in apply order.
    pub migrations: Vec<LocalMigrationWithDatabaseSteps>,
    pub preview: bool,
    pub verbose: bool,
    pub elapsed: Duration,
}

impl UpSummary {
    pub fn is_noop(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn ids(&self) -> Vec<&MigrationId> {
        self.migrations.iter().map(|m| m.id()).collect()
    }
}

impl fmt::Display for UpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.migrations.is_empty() {
            return f.write_str("All migrations are already applied");
        }
        if self.verbose {
            for m in &self.migrations {
                writeln!(f, "-- {}", m.id())?;
                for step in &m.database_steps {
                    writeln!(f, "{}", step.raw)?;
                }
                writeln!(f)?;
            }
        }
        if self.preview {
            write!(
                f,
                "Run lift up to apply {}. Read the details in each migration's README.md.",
                count_migrations(self.migrations.len())
            )
        } else {
            write!(
                f,
                "Done with {} in {}",
                count_migrations(self.migrations.len()),
                format_elapsed(self.elapsed)
            )
        }
    }
}

impl<E> Lift<E>
where
    E: MigrationEngine,
{
    /// Reconcile, plan and apply the pending permanent migrations.
    pub async fn up(&self, options: UpOptions) -> LiftResult<UpSummary> {
        let started = self.clock.elapsed();
        let (_lock, local) = self.load_local()?;
        let source_config = self.read_schema()?;
        let remote = self.list_remote(&source_config).await?;

        let reconciliation = reconcile(&local, &remote, MigrationId::is_ephemeral)?;
        if reconciliation.pending.is_empty() {
            info!("all migrations are already applied");
            return Ok(UpSummary {
                migrations: Vec::new(),
                preview: options.preview,
                verbose: options.verbose,
                elapsed: Duration::ZERO,
            });
        }

        let selected = select_pending(reconciliation.pending, options.selector.as_ref())?;
        let from = reconciliation.first_pending();
        let history = &local[..from + selected.len()];
        let planned = accumulate(&*self.engine, &source_config, history, from).await?;

        let reporter: &dyn Reporter = if options.short {
            &SilentReporter
        } else {
            &*self.reporter
        };

        if options.preview {
            reporter.plan(&planned);
            return Ok(UpSummary {
                migrations: planned,
                preview: true,
                verbose: options.verbose,
                elapsed: self.clock.elapsed().saturating_sub(started),
            });
        }

        reporter.plan(&planned);
        let controller = self.apply_controller(reporter);
        let mut applied = Vec::with_capacity(planned.len());
        for (index, migration) in planned.into_iter().enumerate() {
            let outcome = controller
                .apply(index, &migration.migration, &source_config, false)
                .await?;
            applied.push(LocalMigrationWithDatabaseSteps {
                migration: migration.migration,
                database_steps: outcome.database_steps,
            });
        }

        Ok(UpSummary {
            migrations: applied,
            preview: false,
            verbose: options.verbose,
            elapsed: self.clock.elapsed().saturating_sub(started),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{DatabaseStep, Migration};
    use serde_json::json;

    fn summary(n: usize, preview: bool, verbose: bool) -> UpSummary {
        let migrations = (0..n)
            .map(|i| LocalMigrationWithDatabaseSteps {
                migration: Migration::new(
                    MigrationId::parse(&format!("2020010100000{}-m{}", i, i)).unwrap(),
                    "",
                    vec![],
                ),
                database_steps: vec![DatabaseStep {
                    step: json!({}),
                    raw: format!("CREATE TABLE t{};", i),
                }],
            })
            .collect();
        UpSummary {
            migrations,
            preview,
            verbose,
            elapsed: Duration::from_millis(420),
        }
    }

    #[test]
    fn test_summary_messages() {
        assert_eq!(
            summary(0, false, false).to_string(),
            "All migrations are already applied"
        );
        assert_eq!(
            summary(1, false, false).to_string(),
            "Done with 1 migration in 420ms"
        );
        assert!(summary(2, true, false)
            .to_string()
            .starts_with("Run lift up to apply 2 migrations"));
    }

    #[test]
    fn test_verbose_summary_lists_raw_steps() {
        let text = summary(1, false, true).to_string();
        assert!(text.contains("-- 20200101000000-m0\nCREATE TABLE t0;\n"));
    }
}
