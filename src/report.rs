//! Progress reporting channel.
//!
//! Controllers push events into a [`Reporter`]; the CLI renders them with
//! `colored`, tests record them, watch startup silences them.

use std::io::Write;
use std::sync::Mutex;

use colored::*;

use crate::migration::{LocalMigrationWithDatabaseSteps, MigrationId};

pub trait Reporter: Send + Sync {
    /// The migrations about to be applied, with their database steps.
    fn plan(&self, _migrations: &[LocalMigrationWithDatabaseSteps]) {}

    /// Fraction of the migration at `index` applied so far, in `0.0..=1.0`.
    fn progress(&self, _index: usize, _id: &MigrationId, _fraction: f64) {}

    /// One stdout line of a running hook.
    fn hook_output(&self, _hook: &str, _line: &str) {}

    /// The applied migration was reverted by `lift down`.
    fn rolled_back(&self, _id: &MigrationId) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl Reporter for SilentReporter {}

/// Colored terminal output on stdout.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    last_bucket: Mutex<Option<(usize, u8)>>,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for TerminalReporter {
    fn plan(&self, migrations: &[LocalMigrationWithDatabaseSteps]) {
        println!("{}", "Database Changes:".bold());
        println!();
        for m in migrations {
            println!(
                "  {} {}",
                m.id().to_string().cyan(),
                format!("{} database step(s)", m.database_steps.len()).dimmed()
            );
        }
        println!();
    }

    fn progress(&self, index: usize, id: &MigrationId, fraction: f64) {
        // Quarter buckets keep the output to a handful of lines per migration.
        let bucket = (fraction.clamp(0.0, 1.0) * 4.0).floor() as u8;
        if let Ok(mut last) = self.last_bucket.lock() {
            if *last == Some((index, bucket)) {
                return;
            }
            *last = Some((index, bucket));
        }
        let status = if bucket >= 4 {
            "Done 🚀".green().to_string()
        } else {
            format!("{:>3}%", bucket as u32 * 25).yellow().to_string()
        };
        println!("  {} {}", id.to_string().cyan(), status);
        let _ = std::io::stdout().flush();
    }

    fn hook_output(&self, hook: &str, line: &str) {
        println!("  {} {}", format!("[{}]", hook).dimmed(), line);
    }

    fn rolled_back(&self, id: &MigrationId) {
        println!("  {} {}", "Rolled back".yellow(), id.to_string().cyan());
    }
}

/// One recorded reporter event.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    Plan(Vec<MigrationId>),
    Progress(usize, MigrationId, f64),
    HookOutput(String, String),
    RolledBack(MigrationId),
}

/// Keeps every event in memory, for tests and embedding callers.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: ReportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn plan(&self, migrations: &[LocalMigrationWithDatabaseSteps]) {
        self.push(ReportEvent::Plan(
            migrations.iter().map(|m| m.id().clone()).collect(),
        ));
    }

    fn progress(&self, index: usize, id: &MigrationId, fraction: f64) {
        self.push(ReportEvent::Progress(index, id.clone(), fraction));
    }

    fn hook_output(&self, hook: &str, line: &str) {
        self.push(ReportEvent::HookOutput(hook.to_string(), line.to_string()));
    }

    fn rolled_back(&self, id: &MigrationId) {
        self.push(ReportEvent::RolledBack(id.clone()));
    }
}
