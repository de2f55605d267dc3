//! Cancellable handle over an external process tree
//!
//! Every process started through [`ProcessHandle`] leads its own process
//! group, so the whole tree it forks (browser, renderer, GPU helpers) can be
//! signalled at once.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RunError, RunResult};

/// How long to wait for pipe readers once the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    label: String,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// Captured output of a finished process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ProcessHandle {
    /// Spawn `cmd` as the leader of a new process group with piped output
    pub fn spawn(mut cmd: Command, label: impl Into<String>) -> RunResult<Self> {
        let label = label.into();

        #[cfg(unix)]
        cmd.process_group(0);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| RunError::Launch(format!("failed to spawn {}: {}", label, e)))?;

        let pid = child.id();
        let stdout = child.stdout.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        debug!(pid = ?pid, "Spawned {}", label);

        Ok(Self {
            child,
            pid,
            label,
            stdout,
            stderr,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process itself to exit
    pub async fn wait(&mut self) -> RunResult<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| RunError::Launch(format!("failed to wait for {}: {}", self.label, e)))
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> RunResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Forcefully kill the process, and with `include_descendants` every
    /// member of its process group.
    pub fn kill(&mut self, include_descendants: bool) -> RunResult<()> {
        if include_descendants {
            #[cfg(unix)]
            {
                use nix::errno::Errno;
                use nix::sys::signal::{killpg, Signal};
                use nix::unistd::Pid;

                if let Some(pid) = self.pid {
                    debug!(pgid = pid, "Killing process group of {}", self.label);
                    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                        Ok(()) | Err(Errno::ESRCH) => return Ok(()),
                        Err(e) => {
                            warn!(pgid = pid, "killpg failed for {}: {}", self.label, e);
                        }
                    }
                }
            }
        }

        match self.child.start_kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Collect whatever the process wrote. Call after it has exited.
    pub async fn output(&mut self) -> ProcessOutput {
        ProcessOutput {
            stdout: drain(self.stdout.take()).await,
            stderr: drain(self.stderr.take()).await,
        }
    }
}

async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            // A descendant outside the group still holds the pipe
            reader.abort();
            String::new()
        }
    }
}
