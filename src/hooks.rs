//! Pre/post migration hook scripts.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Result of one hook run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl HookOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Spawns a hook and waits for it to exit.
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// `on_stdout` sees every stdout line as it arrives.
    async fn run(
        &self,
        script: &Path,
        on_stdout: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> std::io::Result<HookOutput>;
}

/// How long output is still collected after the hook exits. Descendants
/// that inherited its stdout or stderr may keep the pipes open for good.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Runs hooks as child processes with the inherited environment and
/// `FORCE_COLOR=1`. Stderr goes to `tracing` on target `lift::hook`.
///
/// Returns on whichever comes first: both streams closing, or the hook
/// exiting. In the second case output is collected for [`DRAIN_GRACE`]
/// longer and whatever arrived by then is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHookRunner;

#[async_trait]
impl HookRunner for ProcessHookRunner {
    async fn run(
        &self,
        script: &Path,
        on_stdout: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> std::io::Result<HookOutput> {
        make_executable(script)?;
        let hook = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut child = Command::new(script)
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();

        let status = {
            let drains = async {
                let log_stderr = |line: &str| {
                    debug!(target: "lift::hook", hook = %hook, "stderr {}", line);
                };
                let (out, err) = tokio::join!(
                    drain(stdout, &mut stdout_buf, on_stdout),
                    drain(stderr, &mut stderr_buf, &log_stderr),
                );
                out.and(err)
            };
            tokio::pin!(drains);

            let exited = tokio::select! {
                drained = &mut drains => {
                    drained?;
                    None
                }
                status = child.wait() => Some(status?),
            };
            match exited {
                Some(status) => {
                    match tokio::time::timeout(DRAIN_GRACE, &mut drains).await {
                        Ok(drained) => drained?,
                        Err(_) => debug!(hook = %hook, "hook exited with its output still open"),
                    }
                    status
                }
                None => child.wait().await?,
            }
        };

        Ok(HookOutput {
            exit_code: status.code(),
            stdout: stdout_buf,
            stderr: stderr_buf,
        })
    }
}

/// Read `reader` line by line into `buf` until EOF.
async fn drain<R>(
    reader: Option<R>,
    buf: &mut String,
    on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        on_line(&line);
        buf.push_str(&line);
        buf.push('\n');
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
