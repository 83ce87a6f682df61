//! Readiness detection by polling container output.
//!
//! Services give no health signal of their own, so a container counts as
//! ready once its combined stdout and stderr match the provider's pattern.
//! Every poll re-reads the whole log, which means output written before the
//! first poll is still seen and a match can never fall between two reads.

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::runtime::{LogsRequest, RuntimeClient};

/// Delay between two log reads.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Waits for a container's output to match a pattern.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessDetector {
    poll_interval: Duration,
}

impl Default for ReadinessDetector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessDetector {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll the logs of `container` until `pattern` matches.
    ///
    /// Must only be called once the container has been started. Returns
    /// [`StateError::ReadinessTimeout`] once `timeout` has elapsed without a
    /// match, even while a log read is still in flight. A failed log read
    /// ends the wait immediately.
    pub async fn wait_ready(
        &self,
        runtime: &dyn RuntimeClient,
        container: &str,
        pattern: &Regex,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StateResult<()> {
        let started = Instant::now();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let request = LogsRequest::snapshot();
        let mut polls = 0u64;
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StateError::Cancelled),
                output = runtime.logs(container, &request) => Some(output),
                _ = &mut deadline => None,
            };
            let Some(output) = fetched else {
                return Err(self.timed_out(container, pattern, timeout, polls));
            };
            let output = output.map_err(|e| StateError::LogFetchError {
                container: container.to_string(),
                message: e.message,
            })?;
            polls += 1;

            if pattern.is_match(&output) {
                debug!(
                    "Container {} ready after {:?} ({} polls)",
                    container,
                    started.elapsed(),
                    polls
                );
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StateError::Cancelled),
                _ = &mut deadline => {
                    return Err(self.timed_out(container, pattern, timeout, polls));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn timed_out(&self, container: &str, pattern: &Regex, timeout: Duration, polls: u64) -> StateError {
        warn!(
            "Container {} did not match /{}/ within {:?} ({} polls)",
            container,
            pattern.as_str(),
            timeout,
            polls
        );
        StateError::ReadinessTimeout {
            container: container.to_string(),
            timeout,
        }
    }
}
