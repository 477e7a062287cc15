//! Apply Controller.
//!
//! Drives one migration through
//! `Pending -> Submitted -> InProgress* -> Succeeded | RolledBack`.
//! Hooks run around it; polling suspends on the injected [`Clock`].

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::HookFailurePolicy;
use crate::engine::{ApplyMigrationInput, MigrationEngine, MigrationProgressInput, ProgressStatus};
use crate::error::{LiftError, LiftResult};
use crate::hooks::HookRunner;
use crate::migration::{DatabaseStep, Migration, MigrationId};
use crate::report::Reporter;

/// Timing of the submit/poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Pause between submission and the first progress request.
    pub submit_delay: Duration,
    /// `None` polls until a terminal status arrives.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            submit_delay: Duration::from_millis(50),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Submitted,
    InProgress { applied: usize, total: usize },
    Succeeded,
    RolledBack(RollbackOutcome),
}

/// Result of a successfully applied migration.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub id: MigrationId,
    pub database_steps: Vec<DatabaseStep>,
    pub state: MigrationState,
    /// Progress requests issued before the terminal status.
    pub polls: usize,
}

/// Submits migrations one at a time and waits for each to finish.
pub struct ApplyController<'a, E: ?Sized> {
    engine: &'a E,
    clock: &'a dyn Clock,
    hooks: &'a dyn HookRunner,
    reporter: &'a dyn Reporter,
    policy: PollPolicy,
    hook_policy: HookFailurePolicy,
}

impl<'a, E> ApplyController<'a, E>
where
    E: MigrationEngine + ?Sized,
{
    pub fn new(
        engine: &'a E,
        clock: &'a dyn Clock,
        hooks: &'a dyn HookRunner,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            engine,
            clock,
            hooks,
            reporter,
            policy: PollPolicy::default(),
            hook_policy: HookFailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_hook_policy(mut self, hook_policy: HookFailurePolicy) -> Self {
        self.hook_policy = hook_policy;
        self
    }

    /// Apply `migration`, the `index`-th of this run.
    ///
    /// Returns only after the executor reports a terminal status. A rollback
    /// status of either kind is fatal.
    pub async fn apply(
        &self,
        index: usize,
        migration: &Migration,
        source_config: &str,
        force: bool,
    ) -> LiftResult<ApplyOutcome> {
        let id = &migration.id;
        let mut state = MigrationState::Pending;

        if let Some(hook) = &migration.before_hook {
            self.run_hook(id, hook).await?;
        }

        let output = self
            .engine
            .apply_migration(ApplyMigrationInput {
                source_config: source_config.to_string(),
                migration_id: id.clone(),
                steps: migration.datamodel_steps.clone(),
                force,
            })
            .await?;
        transition(id, &mut state, MigrationState::Submitted);
        self.reporter.progress(index, id, 0.0);

        self.clock.sleep(self.policy.submit_delay).await;
        let started = self.clock.elapsed();
        let mut polls = 0;

        loop {
            let progress = self
                .engine
                .migration_progress(MigrationProgressInput {
                    source_config: source_config.to_string(),
                    migration_id: id.clone(),
                })
                .await?;
            polls += 1;

            match progress.status {
                ProgressStatus::MigrationSuccess => {
                    transition(id, &mut state, MigrationState::Succeeded);
                    self.reporter.progress(index, id, 1.0);
                    break;
                }
                ProgressStatus::RollbackSuccess => {
                    transition(
                        id,
                        &mut state,
                        MigrationState::RolledBack(RollbackOutcome::Success),
                    );
                    return Err(LiftError::MigrationRolledBack {
                        id: id.clone(),
                        payload: serde_json::to_string(&progress)?,
                    });
                }
                ProgressStatus::RollbackFailure => {
                    transition(
                        id,
                        &mut state,
                        MigrationState::RolledBack(RollbackOutcome::Failure),
                    );
                    return Err(LiftError::RollbackFailed {
                        id: id.clone(),
                        payload: serde_json::to_string(&progress)?,
                    });
                }
                ProgressStatus::MigrationInProgress => {
                    let total = if progress.total > 0 {
                        progress.total
                    } else {
                        output.database_steps.len()
                    };
                    transition(
                        id,
                        &mut state,
                        MigrationState::InProgress {
                            applied: progress.applied,
                            total,
                        },
                    );
                    if total > 0 {
                        let fraction = progress.applied.min(total) as f64 / total as f64;
                        self.reporter.progress(index, id, fraction);
                    }
                }
            }

            if let Some(timeout) = self.policy.timeout {
                let waited = self.clock.elapsed().saturating_sub(started);
                if waited >= timeout {
                    return Err(LiftError::ProgressTimeout {
                        id: id.clone(),
                        waited,
                    });
                }
            }
            self.clock.sleep(self.policy.interval).await;
        }

        info!(id = %id, polls, "migration applied");

        if let Some(hook) = &migration.after_hook {
            self.run_hook(id, hook).await?;
        }

        Ok(ApplyOutcome {
            id: id.clone(),
            database_steps: output.database_steps,
            state,
            polls,
        })
    }

    async fn run_hook(&self, id: &MigrationId, path: &Path) -> LiftResult<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(id = %id, hook = %name, "running hook");

        let on_stdout = |line: &str| self.reporter.hook_output(&name, line);
        let reason = match self.hooks.run(path, &on_stdout).await {
            Ok(output) if output.success() => return Ok(()),
            Ok(output) => match output.exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            },
            Err(e) => format!("could not be started: {}", e),
        };

        match self.hook_policy {
            HookFailurePolicy::Warn => {
                warn!(id = %id, hook = %name, "hook {}", reason);
                Ok(())
            }
            HookFailurePolicy::Abort => Err(LiftError::HookFailed {
                id: id.clone(),
                path: path.to_path_buf(),
                reason,
            }),
        }
    }
}

fn transition(id: &MigrationId, state: &mut MigrationState, next: MigrationState) {
    debug!(id = %id, from = ?state, to = ?next, "migration state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::fake::{progress, Call, FakeEngine};
    use crate::hooks::HookOutput;
    use crate::migration::DatamodelStep;
    use crate::report::{RecordingReporter, ReportEvent, SilentReporter};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records hook paths and answers with a fixed exit code.
    struct ScriptedHooks {
        exit_code: Option<i32>,
        ran: Mutex<Vec<PathBuf>>,
    }

    impl ScriptedHooks {
        fn exiting(code: i32) -> Self {
            Self {
                exit_code: Some(code),
                ran: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HookRunner for ScriptedHooks {
        async fn run(
            &self,
            script: &Path,
            on_stdout: &(dyn for<'l> Fn(&'l str) + Send + Sync),
        ) -> std::io::Result<HookOutput> {
            self.ran.lock().unwrap().push(script.to_path_buf());
            on_stdout("hello from hook");
            Ok(HookOutput {
                exit_code: self.exit_code,
                stdout: "hello from hook\n".into(),
                stderr: String::new(),
            })
        }
    }

    fn migration(id: &str) -> Migration {
        Migration::new(
            MigrationId::parse(id).unwrap(),
            "model User {}",
            vec![DatamodelStep(json!({"stepType": "CreateModel"}))],
        )
    }

    #[tokio::test]
    async fn test_polls_until_success() {
        let engine = FakeEngine::default();
        engine.script_progress([
            progress(ProgressStatus::MigrationInProgress, 0, 4),
            progress(ProgressStatus::MigrationInProgress, 2, 4),
        ]);
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(0);
        let reporter = RecordingReporter::new();

        let controller = ApplyController::new(&engine, &clock, &hooks, &reporter);
        let outcome = controller
            .apply(0, &migration("20200101000000-init"), "src", false)
            .await
            .unwrap();

        assert_eq!(outcome.state, MigrationState::Succeeded);
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.database_steps.len(), 1);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(50),
                Duration::from_millis(1500),
                Duration::from_millis(1500),
            ]
        );

        let fractions: Vec<f64> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::Progress(_, _, f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.0, 0.0, 0.5, 1.0]);

        let calls = engine.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(
            &calls[0],
            Call::Apply { id, force: false } if id.as_str() == "20200101000000-init"
        ));
        assert!(calls[1..]
            .iter()
            .all(|c| matches!(c, Call::Progress(id) if id.as_str() == "20200101000000-init")));
    }

    #[tokio::test]
    async fn test_rollback_success_is_fatal_with_payload() {
        let engine = FakeEngine::default();
        let mut answer = progress(ProgressStatus::RollbackSuccess, 1, 2);
        answer
            .details
            .insert("errors".into(), json!(["column already exists"]));
        engine.script_progress([answer]);
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(0);

        let mut m = migration("20200101000000-init");
        m.after_hook = Some(PathBuf::from("after.sh"));

        let err = ApplyController::new(&engine, &clock, &hooks, &SilentReporter)
            .apply(0, &m, "src", false)
            .await
            .unwrap_err();

        match err {
            LiftError::MigrationRolledBack { id, payload } => {
                assert_eq!(id.as_str(), "20200101000000-init");
                assert!(payload.contains("column already exists"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(hooks.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_failure_is_fatal() {
        let engine = FakeEngine::default();
        engine.script_progress([progress(ProgressStatus::RollbackFailure, 0, 1)]);
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(0);

        let result = ApplyController::new(&engine, &clock, &hooks, &SilentReporter)
            .apply(0, &migration("1-a"), "src", false)
            .await;
        assert!(matches!(result, Err(LiftError::RollbackFailed { .. })));
    }

    #[tokio::test]
    async fn test_timeout_stops_polling() {
        let engine = FakeEngine::default();
        engine.script_progress(
            std::iter::repeat_with(|| progress(ProgressStatus::MigrationInProgress, 0, 1)).take(10),
        );
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(0);
        let policy = PollPolicy {
            interval: Duration::from_secs(1),
            submit_delay: Duration::ZERO,
            timeout: Some(Duration::from_secs(3)),
        };

        let result = ApplyController::new(&engine, &clock, &hooks, &SilentReporter)
            .with_policy(policy)
            .apply(0, &migration("1-a"), "src", false)
            .await;

        assert!(matches!(
            result,
            Err(LiftError::ProgressTimeout { waited, .. }) if waited == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_hooks_run_around_submission() {
        let engine = FakeEngine::default();
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(0);
        let reporter = RecordingReporter::new();

        let mut m = migration("1-a");
        m.before_hook = Some(PathBuf::from("m/before.sh"));
        m.after_hook = Some(PathBuf::from("m/after.sh"));

        ApplyController::new(&engine, &clock, &hooks, &reporter)
            .apply(0, &m, "src", true)
            .await
            .unwrap();

        assert_eq!(
            *hooks.ran.lock().unwrap(),
            vec![PathBuf::from("m/before.sh"), PathBuf::from("m/after.sh")]
        );
        assert!(matches!(engine.calls()[0], Call::Apply { force: true, .. }));
        assert!(reporter.events().contains(&ReportEvent::HookOutput(
            "after.sh".into(),
            "hello from hook".into()
        )));
    }

    #[tokio::test]
    async fn test_failing_hook_warns_by_default() {
        let engine = FakeEngine::default();
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(1);
        let mut m = migration("1-a");
        m.after_hook = Some(PathBuf::from("after.sh"));

        let outcome = ApplyController::new(&engine, &clock, &hooks, &SilentReporter)
            .apply(0, &m, "src", false)
            .await
            .unwrap();
        assert_eq!(outcome.state, MigrationState::Succeeded);
    }

    #[tokio::test]
    async fn test_failing_hook_aborts_under_abort_policy() {
        let engine = FakeEngine::default();
        let clock = ManualClock::new();
        let hooks = ScriptedHooks::exiting(2);
        let mut m = migration("1-a");
        m.before_hook = Some(PathBuf::from("before.sh"));

        let err = ApplyController::new(&engine, &clock, &hooks, &SilentReporter)
            .with_hook_policy(HookFailurePolicy::Abort)
            .apply(0, &m, "src", false)
            .await
            .unwrap_err();

        assert!(matches!(err, LiftError::HookFailed { ref reason, .. } if reason.contains('2')));
        assert!(engine.calls().is_empty());
    }
}
