//! JSON report artifacts written by the runner's reporter plugin

use serde::de::IgnoredAny;
use std::path::{Path, PathBuf};

use crate::error::{RunError, RunResult};

/// Location of the report for `report_name` inside the working copy
pub fn report_path(working_dir: &Path, report_dir: &Path, report_name: &str) -> PathBuf {
    working_dir.join(report_dir).join(format!("{}.json", report_name))
}

/// Read, compact and hex-encode a report
pub async fn load_encoded(path: &Path) -> RunResult<String> {
    let raw = read_report(path).await?;
    let compacted = compact_json(&raw).map_err(|e| RunError::ArtifactUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(hex::encode(compacted))
}

async fn read_report(path: &Path) -> RunResult<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| RunError::ArtifactMissing {
            path: path.display().to_string(),
            source,
        })?;

    let mut content = Vec::new();
    file.read_to_end(&mut content)
        .await
        .map_err(|e| RunError::ArtifactUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(content)
}

/// Strip insignificant whitespace from a JSON document.
///
/// Unlike a parse/serialize round trip this keeps key order, number
/// spelling and string escapes exactly as the reporter wrote them.
pub fn compact_json(input: &[u8]) -> RunResult<Vec<u8>> {
    serde_json::from_slice::<IgnoredAny>(input)?;

    let mut out = Vec::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for &byte in input {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }

    Ok(out)
}
