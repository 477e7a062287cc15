//! In-memory engine for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::*;

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Infer(InferMigrationStepsInput),
    Calculate(CalculateDatabaseStepsInput),
    Apply { id: MigrationId, force: bool },
    Progress(MigrationId),
    Unapply,
    List,
}

#[derive(Default)]
struct State {
    applied: Vec<RemoteMigration>,
    calls: Vec<Call>,
    progress: VecDeque<MigrationProgress>,
    infer: InferMigrationStepsOutput,
    unapply_errors: Vec<serde_json::Value>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Records every call. Applied migrations land in the remote list at once;
/// progress answers come from a script, then `MigrationSuccess` forever.
#[derive(Default)]
pub(crate) struct FakeEngine {
    state: Mutex<State>,
}

pub(crate) fn progress(status: ProgressStatus, applied: usize, total: usize) -> MigrationProgress {
    MigrationProgress {
        status,
        applied,
        total,
        details: serde_json::Map::new(),
    }
}

impl FakeEngine {
    pub(crate) fn with_applied(ids: &[&str]) -> Self {
        let engine = Self::default();
        engine.state.lock().unwrap().applied = ids
            .iter()
            .map(|id| RemoteMigration::applied(MigrationId::parse(id).unwrap()))
            .collect();
        engine
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn applied_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .applied
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub(crate) fn script_progress(&self, answers: impl IntoIterator<Item = MigrationProgress>) {
        self.state.lock().unwrap().progress.extend(answers);
    }

    pub(crate) fn set_inferred(&self, steps: Vec<DatamodelStep>) {
        self.state.lock().unwrap().infer = InferMigrationStepsOutput {
            datamodel_steps: steps,
            database_steps: vec![],
        };
    }

    pub(crate) fn fail_unapply(&self, error: serde_json::Value) {
        self.state.lock().unwrap().unapply_errors.push(error);
    }

    fn record(&self, call: Call) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
    }

    fn finish(&self) {
        self.state.lock().unwrap().in_flight -= 1;
    }
}

#[async_trait]
impl MigrationEngine for FakeEngine {
    async fn infer_migration_steps(
        &self,
        input: InferMigrationStepsInput,
    ) -> EngineResult<InferMigrationStepsOutput> {
        self.record(Call::Infer(input));
        tokio::task::yield_now().await;
        self.finish();
        Ok(self.state.lock().unwrap().infer.clone())
    }

    async fn calculate_database_steps(
        &self,
        input: CalculateDatabaseStepsInput,
    ) -> EngineResult<CalculateDatabaseStepsOutput> {
        let database_steps = input
            .steps_to_apply
            .iter()
            .map(|step| DatabaseStep {
                step: step.0.clone(),
                raw: format!("-- {}", step.0),
            })
            .collect();
        self.record(Call::Calculate(input));
        tokio::task::yield_now().await;
        self.finish();
        Ok(CalculateDatabaseStepsOutput { database_steps })
    }

    async fn apply_migration(&self, input: ApplyMigrationInput) -> EngineResult<ApplyMigrationOutput> {
        self.record(Call::Apply {
            id: input.migration_id.clone(),
            force: input.force,
        });
        let database_steps = input
            .steps
            .iter()
            .map(|step| DatabaseStep {
                step: json!({ "applied": step.0 }),
                raw: format!("-- {}", step.0),
            })
            .collect();
        {
            let mut state = self.state.lock().unwrap();
            state.applied.push(RemoteMigration::applied(input.migration_id));
            state.in_flight -= 1;
        }
        Ok(ApplyMigrationOutput { database_steps })
    }

    async fn migration_progress(&self, input: MigrationProgressInput) -> EngineResult<MigrationProgress> {
        self.record(Call::Progress(input.migration_id));
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        Ok(state
            .progress
            .pop_front()
            .unwrap_or_else(|| progress(ProgressStatus::MigrationSuccess, 0, 0)))
    }

    async fn unapply_migration(
        &self,
        _input: UnapplyMigrationInput,
    ) -> EngineResult<UnapplyMigrationOutput> {
        self.record(Call::Unapply);
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        if !state.unapply_errors.is_empty() {
            return Ok(UnapplyMigrationOutput {
                errors: std::mem::take(&mut state.unapply_errors),
            });
        }
        state.applied.pop();
        Ok(UnapplyMigrationOutput::default())
    }

    async fn list_applied_migrations(
        &self,
        _input: ListMigrationsInput,
    ) -> EngineResult<Vec<RemoteMigration>> {
        self.record(Call::List);
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        Ok(state.applied.clone())
    }
}
