//! # lift
//!
//! Migration history reconciliation and apply engine.
//!
//! The local history (`migrations/<id>/`) is compared against the list of
//! migrations the executor reports as applied. Pending migrations are
//! planned one after another against the steps before them, submitted,
//! and polled until the executor reports a terminal status.
//!
//! ```ignore
//! use lift::{Config, Lift, RpcEngine, UpOptions};
//!
//! let config = Config::load(&project_dir)?;
//! let engine = RpcEngine::new(&config.engine.binary, config.engine.args.clone(), "schema.lift");
//! let lift = Lift::new(&project_dir, config, engine);
//! println!("{}", lift.up(UpOptions::default()).await?);
//! lift.stop().await;
//! ```

pub mod accumulate;
pub mod apply;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod hooks;
pub mod live;
pub mod lockfile;
pub mod migration;
pub mod migrations;
pub mod reconcile;
pub mod report;
pub mod rollback;
pub mod selector;
pub mod store;

pub use config::Config;
pub use engine::{MigrationEngine, RpcEngine};
pub use error::{LiftError, LiftResult};
pub use live::LiveHandle;
pub use migration::{Migration, MigrationId};
pub use migrations::{
    DownOptions, DownSummary, Lift, SaveOptions, SaveOutcome, StatusReport, UpOptions, UpSummary,
};
pub use selector::Selector;
