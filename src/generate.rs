//! Generator pipeline run after each live migration.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::GeneratorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorReport {
    pub name: String,
    pub elapsed: Duration,
    /// Error text when the generator could not run or exited non-zero.
    pub error: Option<String>,
}

impl GeneratorReport {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs configured generator commands in order, in the project directory.
#[derive(Debug, Clone)]
pub struct GeneratorPipeline {
    generators: Vec<GeneratorConfig>,
    cwd: PathBuf,
}

impl GeneratorPipeline {
    pub fn new(generators: Vec<GeneratorConfig>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            generators,
            cwd: cwd.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Run every generator. A failing generator does not stop the others.
    pub async fn run(&self) -> Vec<GeneratorReport> {
        let mut reports = Vec::with_capacity(self.generators.len());
        for generator in &self.generators {
            let started = Instant::now();
            let error = run_one(generator, &self.cwd).await.err();
            let report = GeneratorReport {
                name: generator.name.clone(),
                elapsed: started.elapsed(),
                error,
            };
            match &report.error {
                None => debug!(generator = %report.name, elapsed = ?report.elapsed, "generator done"),
                Some(e) => warn!(generator = %report.name, "generator failed: {}", e),
            }
            reports.push(report);
        }
        reports
    }
}

async fn run_one(generator: &GeneratorConfig, cwd: &Path) -> Result<(), String> {
    let output = Command::new(&generator.command)
        .args(&generator.args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("{}: {}", generator.command, e))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!("{} ({})", output.status, stderr.trim()))
}
