#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use lift::clock::ManualClock;
use lift::engine::*;
use lift::hooks::{HookOutput, HookRunner};
use lift::migration::{DatabaseStep, DatamodelStep, RemoteMigration};
use lift::report::RecordingReporter;
use lift::{Config, Lift, MigrationId};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Infer { id: String, assumed: Vec<Value> },
    Calculate { assumed: Vec<Value>, steps: Vec<Value> },
    Apply { id: String, force: bool },
    Progress(String),
    Unapply,
    List,
}

#[derive(Default)]
struct EngineState {
    applied: Vec<String>,
    calls: Vec<EngineCall>,
    inferred: Vec<Value>,
    progress: VecDeque<MigrationProgress>,
}

/// In-memory planner/executor: applying a migration lands it at once.
#[derive(Default)]
pub struct TestEngine {
    state: Mutex<EngineState>,
}

impl TestEngine {
    pub fn with_applied(ids: &[&str]) -> Self {
        let engine = Self::default();
        engine.state.lock().unwrap().applied = ids.iter().map(|s| s.to_string()).collect();
        engine
    }

    /// Datamodel steps the next `inferMigrationSteps` calls return.
    pub fn infer_returns(&self, steps: Vec<Value>) {
        self.state.lock().unwrap().inferred = steps;
    }

    pub fn script_progress(&self, answers: Vec<MigrationProgress>) {
        self.state.lock().unwrap().progress.extend(answers);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    /// Calls other than `List`.
    pub fn mutating_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != EngineCall::List)
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn values(steps: &[DatamodelStep]) -> Vec<Value> {
    steps.iter().map(|s| s.0.clone()).collect()
}

fn database_steps(steps: &[DatamodelStep]) -> Vec<DatabaseStep> {
    steps
        .iter()
        .map(|s| DatabaseStep {
            step: s.0.clone(),
            raw: format!("-- {}", s.0),
        })
        .collect()
}

#[async_trait]
impl MigrationEngine for TestEngine {
    async fn infer_migration_steps(
        &self,
        input: InferMigrationStepsInput,
    ) -> EngineResult<InferMigrationStepsOutput> {
        self.record(EngineCall::Infer {
            id: input.migration_id.to_string(),
            assumed: values(&input.assume_to_be_applied),
        });
        let steps: Vec<DatamodelStep> = self
            .state
            .lock()
            .unwrap()
            .inferred
            .iter()
            .cloned()
            .map(DatamodelStep)
            .collect();
        Ok(InferMigrationStepsOutput {
            database_steps: database_steps(&steps),
            datamodel_steps: steps,
        })
    }

    async fn calculate_database_steps(
        &self,
        input: CalculateDatabaseStepsInput,
    ) -> EngineResult<CalculateDatabaseStepsOutput> {
        self.record(EngineCall::Calculate {
            assumed: values(&input.assume_to_be_applied),
            steps: values(&input.steps_to_apply),
        });
        Ok(CalculateDatabaseStepsOutput {
            database_steps: database_steps(&input.steps_to_apply),
        })
    }

    async fn apply_migration(&self, input: ApplyMigrationInput) -> EngineResult<ApplyMigrationOutput> {
        self.record(EngineCall::Apply {
            id: input.migration_id.to_string(),
            force: input.force,
        });
        self.state
            .lock()
            .unwrap()
            .applied
            .push(input.migration_id.to_string());
        Ok(ApplyMigrationOutput {
            database_steps: database_steps(&input.steps),
        })
    }

    async fn migration_progress(&self, input: MigrationProgressInput) -> EngineResult<MigrationProgress> {
        self.record(EngineCall::Progress(input.migration_id.to_string()));
        let scripted = self.state.lock().unwrap().progress.pop_front();
        Ok(scripted.unwrap_or_else(|| progress(ProgressStatus::MigrationSuccess, 1, 1)))
    }

    async fn unapply_migration(
        &self,
        _input: UnapplyMigrationInput,
    ) -> EngineResult<UnapplyMigrationOutput> {
        self.record(EngineCall::Unapply);
        self.state.lock().unwrap().applied.pop();
        Ok(UnapplyMigrationOutput::default())
    }

    async fn list_applied_migrations(
        &self,
        _input: ListMigrationsInput,
    ) -> EngineResult<Vec<RemoteMigration>> {
        self.record(EngineCall::List);
        Ok(self
            .applied()
            .iter()
            .map(|id| RemoteMigration::applied(MigrationId::parse(id).unwrap()))
            .collect())
    }
}

pub fn progress(status: ProgressStatus, applied: usize, total: usize) -> MigrationProgress {
    MigrationProgress {
        status,
        applied,
        total,
        details: serde_json::Map::new(),
    }
}

/// Hook runner that records scripts instead of spawning them.
#[derive(Default)]
pub struct RecordingHooks {
    ran: Mutex<Vec<PathBuf>>,
}

impl RecordingHooks {
    pub fn ran(&self) -> Vec<String> {
        self.ran
            .lock()
            .unwrap()
            .iter()
            .map(|p| {
                let dir = p.parent().and_then(|d| d.file_name()).unwrap();
                let file = p.file_name().unwrap();
                format!("{}/{}", dir.to_string_lossy(), file.to_string_lossy())
            })
            .collect()
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn run(
        &self,
        script: &Path,
        on_stdout: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> std::io::Result<HookOutput> {
        self.ran.lock().unwrap().push(script.to_path_buf());
        on_stdout("hook ran");
        Ok(HookOutput {
            exit_code: Some(0),
            stdout: "hook ran\n".into(),
            stderr: String::new(),
        })
    }
}

/// A temporary project directory.
pub struct Project {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub hooks: Arc<RecordingHooks>,
    pub reporter: Arc<RecordingReporter>,
}

impl Project {
    pub fn new() -> Self {
        let project = Self {
            dir: tempfile::tempdir().unwrap(),
            clock: Arc::new(ManualClock::new()),
            hooks: Arc::new(RecordingHooks::default()),
            reporter: Arc::new(RecordingReporter::new()),
        };
        project.write_schema("model User {\n  id Int @id\n}\n");
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.path().join("migrations")
    }

    pub fn write_schema(&self, schema: &str) {
        std::fs::write(self.path().join("schema.lift"), schema).unwrap();
    }

    /// Write a permanent migration with one step named after it.
    pub fn add_migration(&self, id: &str) -> PathBuf {
        let dir = self.migrations_dir().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let steps = json!({ "version": "1", "steps": [step(id)] });
        std::fs::write(dir.join("steps.json"), steps.to_string()).unwrap();
        std::fs::write(dir.join("schema.lift"), format!("// {}\n", id)).unwrap();
        dir
    }

    pub fn write_lock(&self, ids: &[&str]) {
        std::fs::create_dir_all(self.migrations_dir()).unwrap();
        let mut content = String::from("# lift lockfile v1\n\n");
        for id in ids {
            content.push_str(id);
            content.push('\n');
        }
        std::fs::write(self.migrations_dir().join("lift.lock"), content).unwrap();
    }

    pub fn lift(&self, engine: TestEngine) -> Lift<TestEngine> {
        let mut config = Config::default();
        config.watch.debounce_ms = 20;
        Lift::new(self.path(), config, engine)
            .with_clock(self.clock.clone())
            .with_hooks(self.hooks.clone())
            .with_reporter(self.reporter.clone())
    }
}

/// The single datamodel step [`Project::add_migration`] writes for `id`.
pub fn step(id: &str) -> Value {
    json!({ "stepType": "CreateModel", "migration": id })
}
