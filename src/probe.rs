use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use crate::config::HealthcheckConfig;

/// Most stderr bytes retained from a probe for diagnostic logging.
const STDERR_SNIPPET_MAX: usize = 4096;

/// Result of one probe invocation.
///
/// `ok == false` means the probe could not be executed or terminated
/// abnormally; `exit_code` is `-1` in that case. Probes that ran to
/// completion report their real exit code, with death-by-signal N mapped to
/// `128 + N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub exit_code: i32,
    pub ok: bool,
    pub stderr: String,
}

impl ProbeOutcome {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            ok: true,
            stderr: String::new(),
        }
    }

    pub fn execution_failed() -> Self {
        Self {
            exit_code: -1,
            ok: false,
            stderr: String::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.ok && self.exit_code == 0
    }
}

/// Seam between the timer and the container runtime.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn execute(&self, config: &HealthcheckConfig, container_id: &str) -> ProbeOutcome;
}

pub type DynProbeRunner = Arc<dyn ProbeRunner>;

/// Runs probes by spawning the container runtime's `exec` subcommand.
///
/// The configured `timeout` is not enforced here; an overlong probe delays
/// the next tick instead of being killed.
pub struct RuntimeExecRunner {
    runtime_path: PathBuf,
}

impl RuntimeExecRunner {
    pub fn new(runtime_path: impl Into<PathBuf>) -> Self {
        Self {
            runtime_path: runtime_path.into(),
        }
    }
}

#[async_trait]
impl ProbeRunner for RuntimeExecRunner {
    async fn execute(&self, config: &HealthcheckConfig, container_id: &str) -> ProbeOutcome {
        let mut command = Command::new(&self.runtime_path);
        command
            .arg("exec")
            .arg(container_id)
            .args(&config.test)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // Same observable result as an exec that found no runtime
                // binary: a normally exited probe with the shell's 127.
                warn!(
                    container_id = %container_id,
                    runtime = %self.runtime_path.display(),
                    "container runtime not found"
                );
                return ProbeOutcome {
                    exit_code: 127,
                    ok: true,
                    stderr: err.to_string(),
                };
            }
            Err(err) => {
                warn!(
                    container_id = %container_id,
                    error = %err,
                    "failed to spawn healthcheck probe"
                );
                return ProbeOutcome::execution_failed();
            }
        };

        let stderr_pipe = child.stderr.take();
        let (waited, stderr) = tokio::join!(child.wait(), drain_stderr(stderr_pipe));

        let status = match waited {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    container_id = %container_id,
                    error = %err,
                    "failed to wait for healthcheck probe"
                );
                return ProbeOutcome::execution_failed();
            }
        };

        match map_exit_status(status) {
            Some(exit_code) => {
                if !stderr.is_empty() {
                    debug!(
                        container_id = %container_id,
                        exit_code,
                        stderr = %stderr,
                        "healthcheck probe stderr"
                    );
                }
                ProbeOutcome {
                    exit_code,
                    ok: true,
                    stderr,
                }
            }
            None => {
                warn!(container_id = %container_id, "healthcheck probe terminated abnormally");
                ProbeOutcome {
                    exit_code: -1,
                    ok: false,
                    stderr,
                }
            }
        }
    }
}

fn map_exit_status(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }

    None
}

async fn drain_stderr(pipe: Option<ChildStderr>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    // Reads continue past the cap so the child never blocks on a full pipe.
    let mut kept = Vec::new();
    let mut scratch = [0u8; 1024];
    loop {
        match pipe.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => {
                let room = STDERR_SNIPPET_MAX.saturating_sub(kept.len());
                kept.extend_from_slice(&scratch[..n.min(room)]);
            }
            Err(_) => break,
        }
    }

    let mut snippet = String::from_utf8_lossy(&kept).into_owned();
    while snippet.ends_with('\n') || snippet.ends_with('\r') {
        snippet.pop();
    }
    snippet
}
