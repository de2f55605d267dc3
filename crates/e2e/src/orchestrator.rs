//! Batch orchestration: preflight, fan-out, join

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationMonitor;
use crate::collaborators::{GitCli, NpmToolchain, SourceControl, Toolchain};
use crate::config::Settings;
use crate::display::DisplayAllocator;
use crate::error::{RunError, RunResult};
use crate::invocation::InvocationBuilder;
use crate::outcome::ExecutionOutcome;
use crate::reporter::Reporter;
use crate::request::ExecutionRequest;
use crate::worker::{BatchContext, SpecReport, SpecTask, TaskState};

/// Result of a whole batch, in spec order
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub killed: usize,
    pub duration_ms: u64,
    pub results: Vec<SpecReport>,
}

impl BatchSummary {
    fn new(mut results: Vec<SpecReport>, started: Instant) -> Self {
        results.sort_by_key(|r| r.position);
        let passed = results.iter().filter(|r| r.outcome.is_done()).count();
        let killed = results.iter().filter(|r| r.state == TaskState::Killed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            killed,
            duration_ms: started.elapsed().as_millis() as u64,
            results,
        }
    }
}

/// Working copy ready for fan-out
struct Prepared {
    working_copy: TempDir,
    invocations: InvocationBuilder,
}

pub struct Orchestrator {
    settings: Settings,
    source_control: Arc<dyn SourceControl>,
    toolchain: Arc<dyn Toolchain>,
}

impl Orchestrator {
    /// Orchestrator using git and npm as configured
    pub fn new(settings: Settings) -> Self {
        let source_control = Arc::new(GitCli::new(settings.environment.git.clone()));
        let toolchain = Arc::new(NpmToolchain::new(
            settings.environment.clone(),
            settings.runner.clone(),
        ));
        Self::with_collaborators(settings, source_control, toolchain)
    }

    pub fn with_collaborators(
        settings: Settings,
        source_control: Arc<dyn SourceControl>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        Self {
            settings,
            source_control,
            toolchain,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a batch, reporting the way the request asks for
    pub async fn run(&self, request: &ExecutionRequest) -> RunResult<BatchSummary> {
        let reporter = Reporter::for_request(request, &self.settings.report)?;
        self.run_with_reporter(request, reporter).await
    }

    /// Run a batch with an explicit reporter.
    ///
    /// A preflight failure is broadcast to every spec and returned; no task
    /// is started. Otherwise every spec is reported exactly once and the
    /// summary is returned whatever the individual outcomes.
    pub async fn run_with_reporter(
        &self,
        request: &ExecutionRequest,
        reporter: Reporter,
    ) -> RunResult<BatchSummary> {
        let started = Instant::now();

        let prepared = match self.preflight(request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Preflight failed, no spec will run: {}", e);
                reporter
                    .broadcast(request.specs(), &ExecutionOutcome::failed(&e))
                    .await;
                return Err(e);
            }
        };

        let monitor = CancellationMonitor::start(request.timeout());
        let context = Arc::new(BatchContext {
            working_dir: prepared.working_copy.path().to_path_buf(),
            invocations: prepared.invocations,
            display: self.settings.display.clone(),
            reporter,
            deadline: monitor.deadline(),
        });

        info!(
            specs = request.specs().len(),
            timeout = ?request.timeout(),
            "Running specs in parallel"
        );

        let allocator = DisplayAllocator::new(self.settings.display.base_display);
        let handles: Vec<_> = request
            .specs()
            .iter()
            .enumerate()
            .map(|(position, spec)| {
                let task = SpecTask::new(position, spec.clone(), allocator.assign(position), context.clone());
                tokio::spawn(task.run())
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (position, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(report) => results.push(report),
                Err(e) => {
                    let spec = &request.specs()[position];
                    error!(spec = %spec, "Spec task aborted: {}", e);
                    let outcome = ExecutionOutcome::failed(format!("spec task aborted: {}", e));
                    context.reporter.report(spec, &outcome).await;
                    results.push(SpecReport {
                        position,
                        spec: spec.clone(),
                        display: allocator.assign(position),
                        state: TaskState::LaunchFailed,
                        outcome,
                    });
                }
            }
        }

        drop(monitor);
        drop(context);
        let working_dir = prepared.working_copy.path().to_path_buf();
        if let Err(e) = prepared.working_copy.close() {
            warn!("Failed to remove working copy {}: {}", working_dir.display(), e);
        }

        let summary = BatchSummary::new(results, started);
        info!(
            "Batch finished: {} passed, {} failed ({} killed) in {} ms",
            summary.passed, summary.failed, summary.killed, summary.duration_ms
        );
        Ok(summary)
    }

    async fn preflight(&self, request: &ExecutionRequest) -> RunResult<Prepared> {
        let working_copy = tempfile::Builder::new().prefix("specfan-").tempdir()?;
        let dir = working_copy.path();

        self.source_control.fetch(request.source(), dir).await?;
        debug!("Git temp dir {}", dir.display());

        if let Some(config_file) = request.config_file() {
            check_config_file(dir, config_file)?;
        }

        let version = self.toolchain.runner_version(dir).await?;
        debug!("Runner version {}", version);

        self.toolchain.prepare(dir).await?;

        let invocations = InvocationBuilder::new(&version, self.settings.runner.clone(), request.browser())?;
        info!(
            version = %version,
            arguments = ?invocations.argument_set(),
            "Runner environment ready"
        );

        Ok(Prepared {
            working_copy,
            invocations,
        })
    }
}

/// The config file must be a regular file inside the working copy
fn check_config_file(working_dir: &Path, config_file: &Path) -> RunResult<()> {
    let invalid = || RunError::ConfigFile {
        path: config_file.display().to_string(),
    };

    let escapes = config_file
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(invalid());
    }

    match std::fs::metadata(working_dir.join(config_file)) {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(invalid()),
    }
}
