use std::{thread, time::Duration};

use tracing::warn;

use crate::model::error::TransportError;

/// Whether repeating a send can duplicate an external effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Idempotency {
    /// Listing, reads, ACL grants and delete-if-exists.
    Idempotent,
    /// Uploads, copies and plain deletes: retried only when the store
    /// certainly did not apply the request.
    SideEffect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn should_retry(&self, err: &TransportError, mode: Idempotency) -> bool {
        match mode {
            Idempotency::Idempotent => err.is_transient(),
            Idempotency::SideEffect => err.is_unapplied(),
        }
    }

    pub fn execute_with_retry<T, F>(
        &self,
        operation_name: &str,
        mode: Idempotency,
        mut operation: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Result<T, TransportError>,
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if attempt >= self.max_retries || !self.should_retry(&err, mode) {
                        return Err(err);
                    }

                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}
