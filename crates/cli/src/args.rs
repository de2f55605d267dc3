//! Command-line surface and its translation into a batch request

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use specfan_e2e::{Credentials, ExecutionRequest, Settings, SourceRef};

/// Environment variable overriding the collector retry count
pub const RETRY_ENV: &str = "HTTP_RETRY_MAX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// specfan - run end-to-end specs in parallel and report each outcome
#[derive(Debug, Parser)]
#[command(name = "specfan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Collector base URL
    #[arg(long, env = "SPECFAN_API_URL")]
    pub api_url: Option<String>,

    /// Settings file (TOML)
    #[arg(long, env = "SPECFAN_SETTINGS", default_value = "specfan.toml")]
    pub settings: PathBuf,

    /// Repository to clone
    #[arg(short, long)]
    pub repository: String,

    /// Username for the repository
    #[arg(long, requires = "password")]
    pub username: Option<String>,

    /// Password or token for the repository
    #[arg(long, env = "SPECFAN_GIT_PASSWORD", hide_env_values = true, requires = "username")]
    pub password: Option<String>,

    /// Branch or ref to check out
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Comma-separated list of spec files
    #[arg(short, long)]
    pub specs: String,

    /// Run identifier echoed in every report
    #[arg(short, long = "uniq-id")]
    pub uniq_id: String,

    /// Browser to run the specs in
    #[arg(long, default_value = "chrome")]
    pub browser: String,

    /// Runner config file, relative to the repository root
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// Post outcomes to the collector instead of logging them
    #[arg(long)]
    pub report_back: bool,

    /// Batch deadline in minutes
    #[arg(short, long, default_value_t = 10)]
    pub timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn request(&self) -> anyhow::Result<ExecutionRequest> {
        if self.timeout == 0 {
            bail!("--timeout must be at least one minute");
        }
        let Some(timeout_secs) = self.timeout.checked_mul(60) else {
            bail!("--timeout of {} minutes is too large", self.timeout);
        };

        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let source = SourceRef {
            repository: self.repository.clone(),
            credentials,
            reference: self.branch.clone(),
        };

        let request = ExecutionRequest::builder(source, &self.specs, self.uniq_id.clone())
            .browser(self.browser.clone())
            .config_file(self.config_file.clone())
            .report_back(self.report_back)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(request)
    }

    /// Settings file, then flag and environment overrides
    pub fn settings(&self, retry_override: Option<&str>) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(&self.settings)
            .with_context(|| format!("Failed to load settings from {}", self.settings.display()))?;

        if let Some(api_url) = &self.api_url {
            settings.report.api_url = api_url.clone();
        }
        if let Some(value) = retry_override {
            settings.report.max_retries = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a non-negative integer, got {:?}", RETRY_ENV, value))?;
        }
        Ok(settings)
    }
}
