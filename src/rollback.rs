//! Rollback Controller.
//!
//! Reverts applied migrations most-recent-first, one executor `unapply`
//! call per migration.

use tracing::{debug, info};

use crate::engine::{ListMigrationsInput, MigrationEngine, UnapplyMigrationInput};
use crate::error::{LiftError, LiftResult};
use crate::migration::{Migration, MigrationId, RemoteMigration};
use crate::reconcile::reconcile;
use crate::report::Reporter;
use crate::selector::Selector;

/// Migrations reverted by one rollback, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    pub rolled_back: Vec<MigrationId>,
}

impl RollbackSummary {
    pub fn is_noop(&self) -> bool {
        self.rolled_back.is_empty()
    }
}

pub struct RollbackController<'a, E: ?Sized> {
    engine: &'a E,
    reporter: &'a dyn Reporter,
}

impl<'a, E> RollbackController<'a, E>
where
    E: MigrationEngine + ?Sized,
{
    pub fn new(engine: &'a E, reporter: &'a dyn Reporter) -> Self {
        Self { engine, reporter }
    }

    /// Roll back the applied migrations selected by `selector`.
    ///
    /// `live_migrations` is the number of ephemeral migrations on disk; any
    /// at all refuses the rollback before the executor is contacted.
    pub async fn rollback(
        &self,
        local: &[Migration],
        live_migrations: usize,
        selector: &Selector,
        source_config: &str,
    ) -> LiftResult<RollbackSummary> {
        if live_migrations > 0 {
            return Err(LiftError::PendingLiveMigrations {
                count: live_migrations,
            });
        }

        let remote = self
            .engine
            .list_applied_migrations(ListMigrationsInput {
                source_config: source_config.to_string(),
            })
            .await?;

        let reconciliation = reconcile(local, &remote, MigrationId::is_ephemeral)?;
        let applied = reconciliation.applied;
        if applied.is_empty() {
            debug!("nothing applied, rollback is a no-op");
            return Ok(RollbackSummary::default());
        }

        let count = selector.prefix_len(applied.iter().rev().map(|m| &m.id));
        if count == 0 {
            return Err(LiftError::InvalidSelector {
                selector: selector.to_string(),
                target: "applied",
            });
        }

        let live_in_range = live_entries_in_range(&remote, count);
        if live_in_range > 0 {
            return Err(LiftError::PendingLiveMigrations {
                count: live_in_range,
            });
        }

        let mut summary = RollbackSummary::default();
        for migration in applied.iter().rev().take(count) {
            let output = self
                .engine
                .unapply_migration(UnapplyMigrationInput {
                    source_config: source_config.to_string(),
                })
                .await?;
            if !output.errors.is_empty() {
                return Err(LiftError::UnapplyFailed {
                    id: migration.id.clone(),
                    errors: serde_json::to_string(&output.errors)?,
                });
            }
            info!(id = %migration.id, "migration rolled back");
            self.reporter.rolled_back(&migration.id);
            summary.rolled_back.push(migration.id.clone());
        }

        Ok(summary)
    }
}

/// Ephemeral entries among the remote entries `count` unapply calls revert.
///
/// Unapply always reverts the newest remote entry, so every entry down to
/// the oldest selected permanent migration is reverted, wherever it sits.
fn live_entries_in_range(remote: &[RemoteMigration], count: usize) -> usize {
    let mut permanent = 0;
    let mut live = 0;
    for entry in remote.iter().rev() {
        if permanent == count {
            break;
        }
        if entry.id.is_ephemeral() {
            live += 1;
        } else {
            permanent += 1;
        }
    }
    live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{Call, FakeEngine};
    use crate::report::SilentReporter;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn local(ids: &[&str]) -> Vec<Migration> {
        ids.iter()
            .map(|i| Migration::new(MigrationId::parse(i).unwrap(), "", vec![]))
            .collect()
    }

    fn ids(summary: &RollbackSummary) -> Vec<&str> {
        summary.rolled_back.iter().map(MigrationId::as_str).collect()
    }

    #[tokio::test]
    async fn test_default_selector_reverts_latest() {
        let engine = FakeEngine::with_applied(&["1-a", "2-b"]);
        let local = local(&["1-a", "2-b", "3-c"]);

        let summary = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local, 0, &Selector::new("1"), "src")
            .await
            .unwrap();

        assert_eq!(ids(&summary), vec!["2-b"]);
        assert_eq!(engine.applied_ids(), vec!["1-a"]);
    }

    #[tokio::test]
    async fn test_name_selector_reverts_through_match() {
        let engine = FakeEngine::with_applied(&["1-a", "2-b", "3-c"]);
        let local = local(&["1-a", "2-b", "3-c"]);

        let summary = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local, 0, &Selector::new("b"), "src")
            .await
            .unwrap();

        assert_eq!(ids(&summary), vec!["3-c", "2-b"]);
        let unapplies = engine
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Unapply))
            .count();
        assert_eq!(unapplies, 2);
    }

    #[tokio::test]
    async fn test_nothing_applied_is_noop() {
        let engine = FakeEngine::default();
        let summary = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local(&["1-a"]), 0, &Selector::new("1"), "src")
            .await
            .unwrap();
        assert!(summary.is_noop());
    }

    #[tokio::test]
    async fn test_live_migrations_refuse_without_engine_calls() {
        let engine = FakeEngine::with_applied(&["1-a"]);
        let err = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local(&["1-a"]), 1, &Selector::new("1"), "src")
            .await
            .unwrap_err();
        assert!(matches!(err, LiftError::PendingLiveMigrations { count: 1 }));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_remote_live_migration_refuses() {
        let engine = FakeEngine::with_applied(&["1-a", "watch-20200101000000"]);
        let result = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local(&["1-a"]), 0, &Selector::new("1"), "src")
            .await;
        assert!(matches!(result, Err(LiftError::PendingLiveMigrations { count: 1 })));
    }

    #[tokio::test]
    async fn test_interleaved_remote_live_migration_refuses() {
        let engine = FakeEngine::with_applied(&["1-a", "watch-20200101000000", "2-b"]);
        let local = local(&["1-a", "2-b"]);

        let err = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local, 0, &Selector::new("a"), "src")
            .await
            .unwrap_err();

        assert!(matches!(err, LiftError::PendingLiveMigrations { count: 1 }));
        assert!(!engine.calls().iter().any(|c| matches!(c, Call::Unapply)));
        assert_eq!(engine.applied_ids(), vec!["1-a", "watch-20200101000000", "2-b"]);
    }

    #[tokio::test]
    async fn test_live_entry_below_selected_range_is_kept() {
        let engine = FakeEngine::with_applied(&["1-a", "watch-20200101000000", "2-b"]);
        let local = local(&["1-a", "2-b"]);

        let summary = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local, 0, &Selector::new("b"), "src")
            .await
            .unwrap();

        assert_eq!(ids(&summary), vec!["2-b"]);
        assert_eq!(engine.applied_ids(), vec!["1-a", "watch-20200101000000"]);
    }

    #[tokio::test]
    async fn test_unmatched_selector_is_error() {
        let engine = FakeEngine::with_applied(&["1-a"]);
        let result = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local(&["1-a"]), 0, &Selector::new("nope"), "src")
            .await;
        assert!(matches!(
            result,
            Err(LiftError::InvalidSelector { target: "applied", .. })
        ));
    }

    #[tokio::test]
    async fn test_unapply_errors_abort_remaining() {
        let engine = FakeEngine::with_applied(&["1-a", "2-b"]);
        engine.fail_unapply(json!({"message": "cannot drop"}));

        let err = RollbackController::new(&engine, &SilentReporter)
            .rollback(&local(&["1-a", "2-b"]), 0, &Selector::new("2"), "src")
            .await
            .unwrap_err();

        match err {
            LiftError::UnapplyFailed { id, errors } => {
                assert_eq!(id.as_str(), "2-b");
                assert!(errors.contains("cannot drop"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            engine
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::Unapply))
                .count(),
            1
        );
    }
}
