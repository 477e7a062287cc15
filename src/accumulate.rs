//! Step Accumulator.
//!
//! Each pending migration is planned against the datamodel steps of the
//! pending migrations before it. Every planner call depends on the steps
//! gathered so far, so calls are issued one at a time in submission order.

use tracing::debug;

use crate::engine::{CalculateDatabaseStepsInput, MigrationEngine};
use crate::error::LiftResult;
use crate::migration::{DatamodelStep, LocalMigrationWithDatabaseSteps, Migration};

/// Compute database steps for `migrations[from_index..]`.
///
/// `migrations` is the local history up to the last selected migration;
/// entries before `from_index` are already applied and produce no planner
/// call. The assumed-applied context for position `i` is the concatenation
/// of datamodel steps of `migrations[from_index..i]`.
pub async fn accumulate<E>(
    engine: &E,
    source_config: &str,
    migrations: &[Migration],
    from_index: usize,
) -> LiftResult<Vec<LocalMigrationWithDatabaseSteps>>
where
    E: MigrationEngine + ?Sized,
{
    let pending = migrations.get(from_index..).unwrap_or_default();
    let mut assumed: Vec<DatamodelStep> = Vec::new();
    let mut planned = Vec::with_capacity(pending.len());

    for migration in pending {
        debug!(
            id = %migration.id,
            assumed = assumed.len(),
            steps = migration.datamodel_steps.len(),
            "calculating database steps"
        );
        let output = engine
            .calculate_database_steps(CalculateDatabaseStepsInput {
                source_config: source_config.to_string(),
                assume_to_be_applied: assumed.clone(),
                steps_to_apply: migration.datamodel_steps.clone(),
            })
            .await?;

        assumed.extend(migration.datamodel_steps.iter().cloned());
        planned.push(LocalMigrationWithDatabaseSteps {
            migration: migration.clone(),
            database_steps: output.database_steps,
        });
    }

    Ok(planned)
}
