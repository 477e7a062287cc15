//! Contract with the external Migration Planner/Executor.
//!
//! The planner diffs schema snapshots into datamodel and database steps; the
//! executor applies them asynchronously and reports progress. Both live in
//! one external service, reached through [`MigrationEngine`].

#[cfg(test)]
pub(crate) mod fake;
mod rpc;

pub use rpc::RpcEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::migration::{DatabaseStep, DatamodelStep, MigrationId, RemoteMigration};

/// Transport and protocol failures talking to the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to start migration engine {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration engine connection lost: {0}")]
    Disconnected(String),

    #[error("Malformed migration engine response: {0}")]
    Protocol(String),

    #[error("Migration engine error {code} in {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferMigrationStepsInput {
    pub source_config: String,
    pub datamodel: String,
    pub migration_id: MigrationId,
    pub assume_to_be_applied: Vec<DatamodelStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferMigrationStepsOutput {
    #[serde(default)]
    pub datamodel_steps: Vec<DatamodelStep>,
    #[serde(default)]
    pub database_steps: Vec<DatabaseStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateDatabaseStepsInput {
    pub source_config: String,
    pub assume_to_be_applied: Vec<DatamodelStep>,
    pub steps_to_apply: Vec<DatamodelStep>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateDatabaseStepsOutput {
    #[serde(default)]
    pub database_steps: Vec<DatabaseStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyMigrationInput {
    pub source_config: String,
    pub migration_id: MigrationId,
    pub steps: Vec<DatamodelStep>,
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyMigrationOutput {
    #[serde(default)]
    pub database_steps: Vec<DatabaseStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgressInput {
    pub source_config: String,
    pub migration_id: MigrationId,
}

/// Executor-side status while a submitted migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    MigrationInProgress,
    MigrationSuccess,
    RollbackSuccess,
    RollbackFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub status: ProgressStatus,
    #[serde(default)]
    pub applied: usize,
    #[serde(default)]
    pub total: usize,
    /// Anything else the executor attaches (errors, timestamps).
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnapplyMigrationInput {
    pub source_config: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnapplyMigrationOutput {
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMigrationsInput {
    pub source_config: String,
}

/// Planner/executor operations consumed by the reconciliation engine.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    async fn infer_migration_steps(
        &self,
        input: InferMigrationStepsInput,
    ) -> EngineResult<InferMigrationStepsOutput>;

    async fn calculate_database_steps(
        &self,
        input: CalculateDatabaseStepsInput,
    ) -> EngineResult<CalculateDatabaseStepsOutput>;

    /// Starts asynchronous application; poll [`MigrationEngine::migration_progress`].
    async fn apply_migration(&self, input: ApplyMigrationInput) -> EngineResult<ApplyMigrationOutput>;

    async fn migration_progress(&self, input: MigrationProgressInput) -> EngineResult<MigrationProgress>;

    /// Reverts the most recently applied migration.
    async fn unapply_migration(
        &self,
        input: UnapplyMigrationInput,
    ) -> EngineResult<UnapplyMigrationOutput>;

    /// Applied migrations in ascending id order.
    async fn list_applied_migrations(
        &self,
        input: ListMigrationsInput,
    ) -> EngineResult<Vec<RemoteMigration>>;

    /// Release the engine process, if any.
    async fn stop(&self) {}
}
