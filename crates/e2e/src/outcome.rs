//! Terminal result of one spec

use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal sent as `result` when there is no report to attach
pub const EMPTY_RESULT: &str = "{}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Done,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload carried by an outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The `{}` marker
    Empty,
    /// Hex-encoded compacted JSON report
    Encoded(String),
}

impl Payload {
    pub fn as_str(&self) -> &str {
        match self {
            Payload::Empty => EMPTY_RESULT,
            Payload::Encoded(hex) => hex,
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self, Payload::Encoded(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Empty when there is nothing to say
    pub error: String,
    pub payload: Payload,
}

impl ExecutionOutcome {
    /// A failure without a report attached
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: error.to_string(),
            payload: Payload::Empty,
        }
    }

    /// A finished run with its encoded report
    pub fn completed(success: bool, error: String, encoded: String) -> Self {
        Self {
            status: if success {
                ExecutionStatus::Done
            } else {
                ExecutionStatus::Failed
            },
            error,
            payload: Payload::Encoded(encoded),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == ExecutionStatus::Done
    }
}
