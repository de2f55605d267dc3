//! Virtual display management - one Xvfb server per worker

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DisplaySettings;
use crate::error::{RunError, RunResult};
use crate::process::ProcessHandle;

/// An X display number, rendered as `:<n>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Display(pub u32);

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// Maps fan-out positions to display numbers
#[derive(Debug, Clone, Copy)]
pub struct DisplayAllocator {
    base: u32,
}

impl DisplayAllocator {
    pub fn new(base: u32) -> Self {
        Self { base }
    }

    /// Display for the worker at `position`; distinct positions never share one
    pub fn assign(&self, position: usize) -> Display {
        Display(self.base + position as u32)
    }
}

/// Handle to a running display server
pub struct DisplayServer {
    display: Display,
    process: Option<ProcessHandle>,
}

impl DisplayServer {
    /// Start Xvfb on `number` and wait until its socket exists.
    /// With displays disabled this only records the number.
    pub async fn start(settings: &DisplaySettings, number: Display) -> RunResult<Self> {
        if !settings.enabled {
            debug!(display = %number, "Display servers disabled, using existing display");
            return Ok(Self {
                display: number,
                process: None,
            });
        }

        let socket = settings.socket_dir.join(format!("X{}", number.0));
        let lock = settings.lock_dir.join(format!(".X{}-lock", number.0));
        if let Some(existing) = [&socket, &lock].into_iter().find(|p| p.exists()) {
            return Err(RunError::DisplayStartup {
                display: number.to_string(),
                reason: format!("display already in use ({} exists)", existing.display()),
            });
        }

        let mut cmd = Command::new(&settings.binary);
        cmd.arg(number.to_string())
            .args(["-screen", "0", &settings.screen])
            .args(["-nolisten", "tcp"]);

        let process = ProcessHandle::spawn(cmd, format!("Xvfb {}", number)).map_err(|e| {
            RunError::DisplayStartup {
                display: number.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut server = Self {
            display: number,
            process: Some(process),
        };

        if let Err(e) = server.wait_for_ready(&socket, settings.startup_timeout()).await {
            server.stop();
            return Err(e);
        }

        info!(display = %number, "Display server ready");
        Ok(server)
    }

    async fn wait_for_ready(&mut self, socket: &Path, timeout: Duration) -> RunResult<()> {
        let start = Instant::now();

        while start.elapsed() < timeout {
            if let Some(process) = self.process.as_mut() {
                if let Some(status) = process.try_wait()? {
                    let output = process.output().await;
                    return Err(RunError::DisplayStartup {
                        display: self.display.to_string(),
                        reason: format!("exited early with {}: {}", status, output.stderr.trim()),
                    });
                }
            }

            if socket.exists() {
                return Ok(());
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(RunError::DisplayStartup {
            display: self.display.to_string(),
            reason: format!("socket {} did not appear within {:?}", socket.display(), timeout),
        })
    }

    pub fn display(&self) -> Display {
        self.display
    }

    /// Kill the server, if this handle started one
    pub fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            debug!(display = %self.display, "Stopping display server");
            if let Err(e) = process.kill(true) {
                warn!(display = %self.display, "Failed to stop display server: {}", e);
            }
        }
    }
}

impl Drop for DisplayServer {
    fn drop(&mut self) {
        self.stop();
    }
}
