//! Shared fixtures: fake collaborators, a recording sink and a shell
//! stand-in for the runner.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use specfan_e2e::collaborators::{SourceControl, Toolchain};
use specfan_e2e::config::{DisplaySettings, RunnerSettings, Settings};
use specfan_e2e::{ReportSink, RunError, RunResult, SourceRef, Submission};

/// Fake runner. Understands the generated arguments, records what it saw
/// under `$SPECFAN_TEST_OUT` and behaves according to the spec name:
/// `slow` hangs with a child process, `missing` writes no report,
/// `broken` writes invalid JSON, `failing` writes a report and exits 1.
pub const RUNNER_SCRIPT: &str = r#"
args="$*"
spec=""
name=""
while [ $# -gt 0 ]; do
  case "$1" in
    --spec) spec="$2"; shift ;;
    reportFilename=*) name="${1#reportFilename=}" ;;
  esac
  shift
done
printf '%s\n' "$args" > "$SPECFAN_TEST_OUT/$name.args"
printf '%s %s\n' "$DISPLAY" "$NO_COLOR" > "$SPECFAN_TEST_OUT/$name.display"
mkdir -p mochawesome-report
case "$spec" in
  *slow*)
    sleep 30 &
    echo $! > "$SPECFAN_TEST_OUT/$name.child"
    wait
    ;;
  *missing*)
    exit 0
    ;;
  *broken*)
    echo 'not json' > "mochawesome-report/$name.json"
    ;;
  *failing*)
    printf '{"a": 1}\n' > "mochawesome-report/$name.json"
    exit 1
    ;;
  *)
    printf '{"a": 1}\n' > "mochawesome-report/$name.json"
    ;;
esac
"#;

pub fn settings(out_dir: &Path) -> Settings {
    let mut runner = RunnerSettings {
        program: PathBuf::from("sh"),
        program_args: vec!["-c".to_string(), RUNNER_SCRIPT.to_string(), "runner".to_string()],
        ..RunnerSettings::default()
    };
    runner
        .env
        .insert("SPECFAN_TEST_OUT".to_string(), out_dir.display().to_string());

    Settings {
        runner,
        display: DisplaySettings {
            enabled: false,
            ..DisplaySettings::default()
        },
        ..Settings::default()
    }
}

/// Source control that materialises a fixed set of files, or fails
pub struct FakeSource {
    pub files: Vec<(String, String)>,
    pub fail_with: Option<String>,
    pub checkout: Mutex<Option<PathBuf>>,
}

impl FakeSource {
    pub fn ok() -> Self {
        Self {
            files: vec![("cypress.json".to_string(), "{}".to_string())],
            fail_with: None,
            checkout: Mutex::new(None),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::ok()
        }
    }

    pub fn checkout(&self) -> Option<PathBuf> {
        self.checkout.lock().clone()
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn fetch(&self, source: &SourceRef, dest: &Path) -> RunResult<()> {
        *self.checkout.lock() = Some(dest.to_path_buf());
        if let Some(reason) = &self.fail_with {
            return Err(RunError::Clone {
                repository: source.repository.clone(),
                reason: reason.clone(),
            });
        }
        for (name, content) in &self.files {
            std::fs::write(dest.join(name), content)?;
        }
        Ok(())
    }
}

pub struct FakeToolchain {
    pub version: Result<Version, String>,
    pub prepared: AtomicUsize,
}

impl FakeToolchain {
    pub fn version(version: &str) -> Self {
        Self {
            version: Ok(Version::parse(version).unwrap()),
            prepared: AtomicUsize::new(0),
        }
    }

    pub fn broken(reason: &str) -> Self {
        Self {
            version: Err(reason.to_string()),
            prepared: AtomicUsize::new(0),
        }
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn runner_version(&self, _working_dir: &Path) -> RunResult<Version> {
        self.version.clone().map_err(RunError::RunnerVersion)
    }

    async fn prepare(&self, _working_dir: &Path) -> RunResult<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    submissions: Mutex<Vec<Submission>>,
}

impl RecordingSink {
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn for_spec(&self, spec: &str) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.spec == spec)
            .collect()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn submit(&self, submission: &Submission) -> RunResult<()> {
        self.submissions.lock().push(submission.clone());
        Ok(())
    }
}

pub fn sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::default())
}

/// True while `pid` exists and is not a zombie
pub fn is_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Executable Xvfb stand-in under `dir`: creates its socket in `dir` and
/// stays up, except on `failing` where it exits straight away.
pub fn fake_xvfb(dir: &Path, failing: u32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-xvfb");
    let script = format!(
        "#!/bin/sh\n[ \"$1\" = \":{failing}\" ] && exit 1\ntouch {dir}/X${{1#:}}\nexec sleep 30\n",
        failing = failing,
        dir = dir.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
