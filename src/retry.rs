use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::{GatewayError, IngestError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_BULK_WRITE_COOLDOWN: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Reconnect,
    BulkWrite,
    Fatal,
}

impl FailureKind {
    pub fn of(err: &GatewayError) -> Self {
        match err {
            GatewayError::Reconnect(_) => FailureKind::Reconnect,
            GatewayError::BulkWrite { .. } => FailureKind::BulkWrite,
            GatewayError::Other(_) => FailureKind::Fatal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    bulk_write_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_BASE_DELAY,
            DEFAULT_BULK_WRITE_COOLDOWN,
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, bulk_write_cooldown: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            bulk_write_cooldown,
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    // Wait before the attempt following the failed `attempt` (0-based), or
    // `None` when the failure must surface.
    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Option<Duration> {
        if kind == FailureKind::Fatal || attempt + 1 >= self.max_attempts {
            return None;
        }
        if kind == FailureKind::BulkWrite && attempt == 0 {
            return Some(self.bulk_write_cooldown);
        }
        Some(self.base_delay.saturating_mul(2u32.saturating_pow(attempt)))
    }

    pub fn run<T, F>(&self, collection: &str, mut op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Result<T, GatewayError>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let kind = FailureKind::of(&err);
                    let Some(wait) = self.delay_for(kind, attempt) else {
                        return Err(IngestError::Persistence {
                            collection: collection.to_string(),
                            attempts: attempt + 1,
                            source: err,
                        });
                    };
                    warn!(
                        collection,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "persistence call failed, retrying"
                    );
                    thread::sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}
