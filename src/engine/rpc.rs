//! JSON-RPC 2.0 client for a migration engine child process.
//!
//! One request per line on stdin, one response per line on stdout. The
//! process is started on first use and lives until [`RpcEngine::stop`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::*;

/// Migration engine reached over stdio.
pub struct RpcEngine {
    binary: String,
    args: Vec<String>,
    datamodel_path: PathBuf,
    conn: Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    data: Option<serde_json::Value>,
}

impl RpcEngine {
    pub fn new(binary: impl Into<String>, args: Vec<String>, datamodel_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args,
            datamodel_path: datamodel_path.into(),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn spawn(&self) -> EngineResult<Connection> {
        debug!(binary = %self.binary, "starting migration engine");
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .arg("--datamodel")
            .arg(&self.datamodel_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Disconnected("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Disconnected("stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "lift::engine", "{}", line);
                }
            });
        }

        Ok(Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn call<P, R>(&self, method: &str, params: P) -> EngineResult<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        line.push('\n');

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(EngineError::Disconnected("engine not running".into()));
        };

        debug!(method, id, "engine request");
        if let Err(e) = write_line(&mut conn.stdin, &line).await {
            *guard = None;
            return Err(EngineError::Disconnected(e.to_string()));
        }

        let response = loop {
            let next = match conn.stdout.next_line().await {
                Ok(Some(next)) => next,
                Ok(None) => {
                    *guard = None;
                    return Err(EngineError::Disconnected(format!(
                        "engine exited while handling {}",
                        method
                    )));
                }
                Err(e) => {
                    *guard = None;
                    return Err(EngineError::Disconnected(e.to_string()));
                }
            };
            if next.trim().is_empty() {
                continue;
            }
            let response: RpcResponse = serde_json::from_str(&next)
                .map_err(|e| EngineError::Protocol(format!("{}: {}", e, next)))?;
            // Notifications and stale replies carry other ids.
            if response.id == Some(id) {
                break response;
            }
        };

        if let Some(error) = response.error {
            return Err(EngineError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result).map_err(|e| EngineError::Protocol(format!("{}: {}", method, e)))
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

#[async_trait]
impl MigrationEngine for RpcEngine {
    async fn infer_migration_steps(
        &self,
        input: InferMigrationStepsInput,
    ) -> EngineResult<InferMigrationStepsOutput> {
        self.call("inferMigrationSteps", input).await
    }

    async fn calculate_database_steps(
        &self,
        input: CalculateDatabaseStepsInput,
    ) -> EngineResult<CalculateDatabaseStepsOutput> {
        self.call("calculateDatabaseSteps", input).await
    }

    async fn apply_migration(&self, input: ApplyMigrationInput) -> EngineResult<ApplyMigrationOutput> {
        self.call("applyMigration", input).await
    }

    async fn migration_progress(&self, input: MigrationProgressInput) -> EngineResult<MigrationProgress> {
        self.call("migrationProgress", input).await
    }

    async fn unapply_migration(
        &self,
        input: UnapplyMigrationInput,
    ) -> EngineResult<UnapplyMigrationOutput> {
        self.call("unapplyMigration", input).await
    }

    async fn list_applied_migrations(
        &self,
        input: ListMigrationsInput,
    ) -> EngineResult<Vec<RemoteMigration>> {
        self.call("listMigrations", input).await
    }

    async fn stop(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.child.kill().await {
                debug!(error = %e, "migration engine already gone");
            }
        }
    }
}
