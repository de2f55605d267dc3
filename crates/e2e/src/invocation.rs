//! Runner command-line construction
//!
//! The runner changed its flags at a major version: older releases need an
//! explicit `--headless`, newer ones are headless by default in `run` mode.
//! The shape is chosen once per batch from the installed version.

use regex::Regex;
use semver::Version;
use std::path::Path;

use crate::config::RunnerSettings;
use crate::error::{RunError, RunResult};

/// Suffixes stripped from a spec file name to get its report name
const SPEC_SUFFIXES: [&str; 2] = [".spec.js", ".cy.js"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSet {
    /// Below the threshold version; headless must be requested
    Legacy,
    /// At or above the threshold version
    Modern,
}

impl ArgumentSet {
    pub fn select(version: &Version, threshold: &Version) -> Self {
        if version < threshold {
            ArgumentSet::Legacy
        } else {
            ArgumentSet::Modern
        }
    }

    /// Arguments for running one spec, excluding any program prefix
    pub fn build(&self, browser: &str, spec: &str, reporter: &str, report_name: &str) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--browser".to_string(), browser.to_string()];
        if *self == ArgumentSet::Legacy {
            args.push("--headless".to_string());
        }
        args.extend([
            "--spec".to_string(),
            spec.to_string(),
            "--reporter".to_string(),
            reporter.to_string(),
            "--reporter-options".to_string(),
            format!("reportFilename={}", report_name),
        ]);
        args
    }
}

/// Extract the package version from `<runner> --version` output
pub fn parse_version_output(output: &str) -> RunResult<Version> {
    let re = Regex::new(r"(?m)^\s*Cypress package version:\s*(\S+)\s*$")
        .map_err(|e| RunError::RunnerVersion(e.to_string()))?;

    let raw = re
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            RunError::RunnerVersion(format!("no package version in output: {}", output.trim()))
        })?;

    parse_version(raw)
}

/// Parse a runner version, tolerating a leading `v`
pub fn parse_version(raw: &str) -> RunResult<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    Version::parse(trimmed)
        .map_err(|e| RunError::RunnerVersion(format!("invalid version '{}': {}", raw, e)))
}

/// Report name for a spec: its file name without known test suffixes
pub fn report_base_name(spec: &str) -> String {
    let file = Path::new(spec)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| spec.to_string());

    let mut name = file.as_str();
    for suffix in SPEC_SUFFIXES {
        name = name.strip_suffix(suffix).unwrap_or(name);
    }
    name.to_string()
}

/// Everything needed to start the runner for one spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: std::path::PathBuf,
    pub args: Vec<String>,
    pub report_name: String,
}

/// Builds invocations for a whole batch from a single resolved version
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    argument_set: ArgumentSet,
    settings: RunnerSettings,
    browser: String,
}

impl InvocationBuilder {
    pub fn new(version: &Version, settings: RunnerSettings, browser: impl Into<String>) -> RunResult<Self> {
        let threshold = Version::parse(&settings.modern_threshold).map_err(|e| {
            RunError::Settings(format!("invalid modern threshold '{}': {}", settings.modern_threshold, e))
        })?;
        Ok(Self {
            argument_set: ArgumentSet::select(version, &threshold),
            settings,
            browser: browser.into(),
        })
    }

    pub fn argument_set(&self) -> ArgumentSet {
        self.argument_set
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn for_spec(&self, spec: &str) -> Invocation {
        let report_name = report_base_name(spec);
        let mut args = self.settings.program_args.clone();
        args.extend(
            self.argument_set
                .build(&self.browser, spec, &self.settings.reporter, &report_name),
        );
        Invocation {
            program: self.settings.program.clone(),
            args,
            report_name,
        }
    }
}
