//! Immutable description of one batch

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RunError, RunResult};

/// Basic-auth credentials for the source repository
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the specs come from
#[derive(Debug, Clone)]
pub struct SourceRef {
    /// HTTP(s) repository location
    pub repository: String,
    pub credentials: Option<Credentials>,
    /// Branch, tag or full ref; `None` means the remote's default branch
    pub reference: Option<String>,
}

/// One batch of specs to execute
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    source: SourceRef,
    specs: Vec<String>,
    run_id: String,
    browser: String,
    config_file: Option<PathBuf>,
    report_back: bool,
    timeout: Duration,
}

impl ExecutionRequest {
    pub fn builder(source: SourceRef, specs: &str, run_id: impl Into<String>) -> ExecutionRequestBuilder {
        ExecutionRequestBuilder {
            source,
            specs: specs.to_string(),
            run_id: run_id.into(),
            browser: "chrome".to_string(),
            config_file: None,
            report_back: false,
            timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    /// Spec paths in the order they were given, duplicates included
    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Branch reported back to the collector; empty when none was given
    pub fn branch(&self) -> &str {
        self.source.reference.as_deref().unwrap_or("")
    }

    pub fn browser(&self) -> &str {
        &self.browser
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn report_back(&self) -> bool {
        self.report_back
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub struct ExecutionRequestBuilder {
    source: SourceRef,
    specs: String,
    run_id: String,
    browser: String,
    config_file: Option<PathBuf>,
    report_back: bool,
    timeout: Duration,
}

impl ExecutionRequestBuilder {
    pub fn browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = browser.into();
        self
    }

    pub fn config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    pub fn report_back(mut self, enabled: bool) -> Self {
        self.report_back = enabled;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> RunResult<ExecutionRequest> {
        let specs = parse_specs(&self.specs);
        if specs.is_empty() {
            return Err(RunError::InvalidRequest("spec list is empty".to_string()));
        }
        if self.run_id.trim().is_empty() {
            return Err(RunError::InvalidRequest("run id is empty".to_string()));
        }
        if self.source.repository.trim().is_empty() {
            return Err(RunError::InvalidRequest("repository is empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(RunError::InvalidRequest("timeout must be positive".to_string()));
        }

        let reference = self.source.reference.filter(|r| !r.trim().is_empty());
        let credentials = self.source.credentials.filter(|c| !c.username.is_empty());

        Ok(ExecutionRequest {
            source: SourceRef {
                repository: self.source.repository,
                credentials,
                reference,
            },
            specs,
            run_id: self.run_id,
            browser: self.browser,
            config_file: self.config_file,
            report_back: self.report_back,
            timeout: self.timeout,
        })
    }
}

/// Split a comma-separated spec list, keeping order and duplicates.
/// Blank entries (e.g. from a trailing comma) are skipped.
pub fn parse_specs(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
