//! Lifecycle of a single spec
//!
//! ```text
//! Starting ──► DisplayReady ──► Launched ──► Completed
//!    │               │             ├──────► ArtifactMissing
//!    └──► LaunchFailed ◄┘          └──────► ArtifactUnreadable
//!
//! any non-terminal state ──(deadline)──► Killed
//! ```
//!
//! Every task reports exactly one outcome, whichever way it ends.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::artifact::{load_encoded, report_path};
use crate::cancel::Deadline;
use crate::config::DisplaySettings;
use crate::display::{Display, DisplayServer};
use crate::error::RunError;
use crate::invocation::{Invocation, InvocationBuilder};
use crate::outcome::ExecutionOutcome;
use crate::process::ProcessHandle;
use crate::reporter::Reporter;

/// Time allowed for a killed process group to be reaped
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Starting,
    DisplayReady,
    Launched,
    Completed,
    Killed,
    LaunchFailed,
    ArtifactMissing,
    ArtifactUnreadable,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Starting | TaskState::DisplayReady | TaskState::Launched)
    }
}

/// State shared read-only by every task of a batch
pub struct BatchContext {
    pub working_dir: PathBuf,
    pub invocations: InvocationBuilder,
    pub display: DisplaySettings,
    pub reporter: Reporter,
    pub deadline: Deadline,
}

/// What a finished task hands back at the join barrier
#[derive(Debug, Clone)]
pub struct SpecReport {
    pub position: usize,
    pub spec: String,
    pub display: Display,
    pub state: TaskState,
    pub outcome: ExecutionOutcome,
}

pub struct SpecTask {
    position: usize,
    spec: String,
    display: Display,
    state: TaskState,
    context: Arc<BatchContext>,
}

impl SpecTask {
    pub fn new(position: usize, spec: String, display: Display, context: Arc<BatchContext>) -> Self {
        Self {
            position,
            spec,
            display,
            state: TaskState::Starting,
            context,
        }
    }

    /// Drive the spec to a terminal state and report its outcome
    pub async fn run(mut self) -> SpecReport {
        let outcome = self.execute().await;
        debug_assert!(self.state.is_terminal());

        self.context.reporter.report(&self.spec, &outcome).await;

        SpecReport {
            position: self.position,
            spec: self.spec,
            display: self.display,
            state: self.state,
            outcome,
        }
    }

    async fn execute(&mut self) -> ExecutionOutcome {
        let context = self.context.clone();
        let deadline = context.deadline.clone();

        // Starting -> DisplayReady
        let mut display_server =
            match until_deadline(&deadline, DisplayServer::start(&context.display, self.display)).await {
                None => return self.killed(),
                Some(Err(e)) => return self.fail(TaskState::LaunchFailed, e),
                Some(Ok(server)) => server,
            };
        self.transition(TaskState::DisplayReady);

        // DisplayReady -> Launched
        let invocation = context.invocations.for_spec(&self.spec);
        debug!(
            spec = %self.spec,
            "Running command {} {}",
            invocation.program.display(),
            invocation.args.join(" ")
        );
        let mut process = match ProcessHandle::spawn(self.command(&invocation), format!("runner for {}", self.spec)) {
            Ok(process) => process,
            Err(e) => return self.fail(TaskState::LaunchFailed, e),
        };
        self.transition(TaskState::Launched);

        let status = match until_deadline(&deadline, process.wait()).await {
            None => {
                if let Err(e) = process.kill(true) {
                    error!(spec = %self.spec, "Failed to kill runner process group: {}", e);
                }
                if tokio::time::timeout(KILL_REAP_TIMEOUT, process.wait()).await.is_err() {
                    warn!(spec = %self.spec, "Runner did not exit after kill");
                }
                display_server.stop();
                return self.killed();
            }
            Some(Err(e)) => {
                display_server.stop();
                return self.fail(TaskState::LaunchFailed, e);
            }
            Some(Ok(status)) => status,
        };

        let output = process.output().await;
        debug!(spec = %self.spec, "Execution output {}", output.stdout.trim());
        if !status.success() {
            warn!(spec = %self.spec, "Runner exited with {}: {}", status, output.stderr.trim());
        }
        display_server.stop();

        // Launched -> Completed | ArtifactMissing | ArtifactUnreadable
        let path = report_path(
            &context.working_dir,
            &context.invocations.settings().report_dir,
            &invocation.report_name,
        );
        match until_deadline(&deadline, load_encoded(&path)).await {
            None => self.killed(),
            Some(Ok(encoded)) => self.complete(status, encoded),
            Some(Err(e @ RunError::ArtifactMissing { .. })) => self.fail(TaskState::ArtifactMissing, e),
            Some(Err(e)) => self.fail(TaskState::ArtifactUnreadable, e),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&self.context.working_dir)
            .envs(&self.context.invocations.settings().env)
            .env("DISPLAY", self.display.to_string())
            .env("NO_COLOR", "1");
        cmd
    }

    fn transition(&mut self, next: TaskState) {
        debug!(spec = %self.spec, from = ?self.state, to = ?next, "Spec state change");
        self.state = next;
    }

    fn complete(&mut self, status: ExitStatus, encoded: String) -> ExecutionOutcome {
        self.transition(TaskState::Completed);
        let error = if status.success() {
            String::new()
        } else {
            format!("runner exited with {}", status)
        };
        info!(spec = %self.spec, success = status.success(), "Spec completed");
        ExecutionOutcome::completed(status.success(), error, encoded)
    }

    fn fail(&mut self, state: TaskState, err: RunError) -> ExecutionOutcome {
        error!(spec = %self.spec, state = ?state, "Spec failed: {}", err);
        self.transition(state);
        ExecutionOutcome::failed(err)
    }

    fn killed(&mut self) -> ExecutionOutcome {
        let err = self.context.deadline.error();
        error!(spec = %self.spec, "{}", err);
        self.transition(TaskState::Killed);
        ExecutionOutcome::failed(err)
    }
}

/// Run `fut` unless the deadline fires first
async fn until_deadline<F: Future>(deadline: &Deadline, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = deadline.expired() => None,
        out = fut => Some(out),
    }
}
