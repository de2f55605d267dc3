//! Runner settings
//!
//! Everything about *how* a batch is executed that is not part of the
//! per-invocation [`ExecutionRequest`](crate::request::ExecutionRequest):
//! which runner binary to call, where displays live, how reports are sent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RunError, RunResult};

/// Top-level settings, loadable from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Test runner invocation
    pub runner: RunnerSettings,

    /// Virtual display servers
    pub display: DisplaySettings,

    /// Result reporting
    pub report: ReportSettings,

    /// Working copy preparation
    pub environment: EnvironmentSettings,
}

/// How the browser-automation runner is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Runner executable
    pub program: PathBuf,

    /// Arguments placed before the generated ones (e.g. `["cypress"]` for `npx`)
    pub program_args: Vec<String>,

    /// Reporter plugin passed with `--reporter`
    pub reporter: String,

    /// Directory, relative to the working copy, where the reporter writes JSON
    pub report_dir: PathBuf,

    /// First runner version that takes the modern argument set
    pub modern_threshold: String,

    /// Extra environment for every runner process
    pub env: HashMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("cypress"),
            program_args: Vec::new(),
            reporter: "mochawesome".to_string(),
            report_dir: PathBuf::from("mochawesome-report"),
            modern_threshold: "10.0.0".to_string(),
            env: HashMap::new(),
        }
    }
}

/// Xvfb configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Start an Xvfb server per worker; when false the display number is
    /// still exported but no server is started
    pub enabled: bool,

    /// Path to the Xvfb binary
    pub binary: PathBuf,

    /// Display number given to the first worker
    pub base_display: u32,

    /// Screen geometry passed as `-screen 0 <screen>`
    pub screen: String,

    /// Directory where X servers create their sockets
    pub socket_dir: PathBuf,

    /// Directory holding the `.X<n>-lock` files
    pub lock_dir: PathBuf,

    /// How long to wait for the X socket to appear
    pub startup_timeout_secs: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: PathBuf::from("Xvfb"),
            base_display: 99,
            screen: "1280x1024x24".to_string(),
            socket_dir: PathBuf::from("/tmp/.X11-unix"),
            lock_dir: PathBuf::from("/tmp"),
            startup_timeout_secs: 10,
        }
    }
}

impl DisplaySettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

/// Collector endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Base URL of the collector API
    pub api_url: String,

    /// Additional attempts after the first failed submission
    pub max_retries: u32,

    /// Delay multiplied by the attempt number between retries
    pub retry_backoff_ms: u64,

    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl ReportSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Tools used to fetch and prepare the working copy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub git: PathBuf,
    pub npm: PathBuf,

    /// Package reinstalled from scratch before the batch
    pub runner_package: String,

    /// Reporter plugin installed as a dev dependency
    pub reporter_package: String,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            npm: PathBuf::from("npm"),
            runner_package: "cypress".to_string(),
            reporter_package: "mochawesome".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> RunResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> RunResult<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> RunResult<()> {
        if semver::Version::parse(&self.runner.modern_threshold).is_err() {
            return Err(RunError::Settings(format!(
                "runner.modern_threshold '{}' is not a semantic version",
                self.runner.modern_threshold
            )));
        }
        if self.report.api_url.trim().is_empty() {
            return Err(RunError::Settings("report.api_url must not be empty".to_string()));
        }
        Ok(())
    }
}
