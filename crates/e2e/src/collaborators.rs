//! External tools used during preflight: git for the working copy, npm for
//! the runner's dependencies, and the runner itself for its version.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use semver::Version;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

use crate::config::{EnvironmentSettings, RunnerSettings};
use crate::error::{RunError, RunResult};
use crate::invocation::parse_version_output;
use crate::request::{Credentials, SourceRef};

/// Fetches the source tree into a directory
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn fetch(&self, source: &SourceRef, dest: &Path) -> RunResult<()>;
}

/// Prepares the runner inside a working copy
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Version of the installed runner
    async fn runner_version(&self, working_dir: &Path) -> RunResult<Version>;

    /// Clean reinstall of the runner package plus the reporter plugin
    async fn prepare(&self, working_dir: &Path) -> RunResult<()>;
}

/// Shallow clone through the `git` binary
pub struct GitCli {
    program: PathBuf,
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

/// `Authorization` header value for HTTP basic auth
fn basic_auth_header(creds: &Credentials) -> String {
    let token = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
    format!("Authorization: Basic {}", token)
}

/// Remove every rendering of the password git might echo back
fn redact(text: &str, creds: &Credentials) -> String {
    if creds.password.is_empty() {
        return text.to_string();
    }

    let url_form = reqwest::Url::parse("https://host/").ok().and_then(|mut url| {
        url.set_password(Some(&creds.password)).ok()?;
        url.password().map(str::to_string)
    });

    let mut redacted = text.replace(&basic_auth_header(creds), "Authorization: Basic ***");
    redacted = redacted.replace(&creds.password, "***");
    if let Some(url_form) = url_form {
        redacted = redacted.replace(&url_form, "***");
    }
    redacted
}

/// Branch to pass to `git clone --branch`; `None` for the default branch
pub fn target_branch(reference: Option<&str>) -> Option<String> {
    match reference.map(str::trim) {
        None | Some("") | Some("master") | Some("refs/heads/master") => None,
        Some(r) => Some(r.strip_prefix("refs/heads/").unwrap_or(r).to_string()),
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn fetch(&self, source: &SourceRef, dest: &Path) -> RunResult<()> {
        let branch = target_branch(source.reference.as_deref());
        debug!(repository = %source.repository, branch = ?branch, "Cloning repository");

        let mut cmd = Command::new(&self.program);
        cmd.args(["clone", "--depth", "1", "--quiet"]);
        if let Some(branch) = &branch {
            cmd.args(["--branch", branch]);
        }
        cmd.arg(&source.repository).arg(dest);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(creds) = &source.credentials {
            // Passed through the environment so it never shows up in argv
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", basic_auth_header(creds));
        }

        let output = run(cmd, "git clone").await.map_err(|e| RunError::Clone {
            repository: source.repository.clone(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = match &source.credentials {
                Some(creds) => redact(&stderr, creds),
                None => stderr,
            };
            return Err(RunError::Clone {
                repository: source.repository.clone(),
                reason,
            });
        }
        Ok(())
    }
}

/// npm-based environment with the runner invoked as configured
pub struct NpmToolchain {
    environment: EnvironmentSettings,
    runner: RunnerSettings,
}

impl NpmToolchain {
    pub fn new(environment: EnvironmentSettings, runner: RunnerSettings) -> Self {
        Self { environment, runner }
    }

    async fn npm(&self, working_dir: &Path, args: &[&str]) -> RunResult<()> {
        let mut cmd = Command::new(&self.environment.npm);
        cmd.args(args).current_dir(working_dir);

        let what = format!("npm {}", args.join(" "));
        let output = run(cmd, &what)
            .await
            .map_err(|e| RunError::Environment(e.to_string()))?;

        debug!("{} output {}", what, String::from_utf8_lossy(&output.stdout).trim());
        if !output.status.success() {
            return Err(RunError::Environment(format!(
                "{} exited with {}: {}",
                what,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Toolchain for NpmToolchain {
    async fn runner_version(&self, working_dir: &Path) -> RunResult<Version> {
        let mut cmd = Command::new(&self.runner.program);
        cmd.args(&self.runner.program_args)
            .arg("--version")
            .current_dir(working_dir);

        let output = run(cmd, "runner --version")
            .await
            .map_err(|e| RunError::RunnerVersion(e.to_string()))?;
        if !output.status.success() {
            return Err(RunError::RunnerVersion(format!(
                "runner --version exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("Runner version output {}", stdout.trim());
        parse_version_output(&stdout)
    }

    async fn prepare(&self, working_dir: &Path) -> RunResult<()> {
        let package = self.environment.runner_package.as_str();
        self.npm(working_dir, &["uninstall", package]).await?;
        self.npm(working_dir, &["uninstall", "-D", package]).await?;
        self.npm(working_dir, &["install"]).await?;
        self.npm(
            working_dir,
            &["install", "--save-dev", &self.environment.reporter_package],
        )
        .await
    }
}

async fn run(mut cmd: Command, what: &str) -> RunResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.output()
        .await
        .map_err(|e| RunError::Launch(format!("failed to run {}: {}", what, e)))
}
