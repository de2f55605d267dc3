//! Batch deadline
//!
//! A single timer per batch cancels a shared token when the configured
//! timeout elapses. Workers hold a [`Deadline`] and race every suspension
//! point against it; on expiry they kill their own process group.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::RunError;

/// Worker-side view of the batch deadline
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    timeout: Duration,
}

impl Deadline {
    /// Resolves once the deadline has fired
    pub async fn expired(&self) {
        self.token.cancelled().await
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn error(&self) -> RunError {
        RunError::DeadlineExceeded(self.timeout)
    }
}

/// Upper bound for the deadline instant
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Owns the batch timer
pub struct CancellationMonitor {
    deadline: Deadline,
    expires_at: Instant,
    timer: JoinHandle<()>,
}

impl CancellationMonitor {
    /// Start the clock: the deadline fires `timeout` from now
    pub fn start(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let now = Instant::now();
        let expires_at = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        let timer_token = token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(expires_at) => {
                    warn!("Execution timeout reached after {:?}, killing remaining specs", timeout);
                    timer_token.cancel();
                }
                _ = timer_token.cancelled() => {}
            }
        });

        Self {
            deadline: Deadline { token, timeout },
            expires_at,
            timer,
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline.clone()
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Fire the deadline now
    pub fn expire(&self) {
        self.deadline.token.cancel();
    }
}

impl Drop for CancellationMonitor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}
