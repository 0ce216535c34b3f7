use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure budget for one device.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    /// Failed verifications tolerated inside one window.
    pub max_failures: u32,
    /// Window over which failures are counted.
    pub window: Duration,
    /// How long a device stays locked once the budget is spent.
    pub lockout: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_failures: 5,
            window: Duration::from_secs(60),
            lockout: Duration::from_secs(300),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("too many failed attempts; try again in {retry_after_secs}s")]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

struct DeviceRecord {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

impl DeviceRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            failures: 0,
            window_start: now,
            locked_until: None,
        }
    }
}

/// Per-device limiter for verification attempts.
///
/// Only a completed session that fails the policy counts as a failure.
/// Engine errors and timeouts leave the counter alone.
pub struct RateLimiter {
    limits: RateLimits,
    records: HashMap<String, DeviceRecord>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            records: HashMap::new(),
        }
    }

    pub fn check(&mut self, device_id: &str) -> Result<(), RateLimited> {
        self.check_at(device_id, Instant::now())
    }

    pub fn record_failure(&mut self, device_id: &str) {
        self.record_failure_at(device_id, Instant::now());
    }

    /// A pass clears the device's history.
    pub fn record_success(&mut self, device_id: &str) {
        self.records.remove(device_id);
    }

    fn check_at(&mut self, device_id: &str, now: Instant) -> Result<(), RateLimited> {
        let Some(record) = self.records.get_mut(device_id) else {
            return Ok(());
        };

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                let remaining = locked_until.duration_since(now);
                return Err(RateLimited {
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }
            *record = DeviceRecord::fresh(now);
        } else if now.duration_since(record.window_start) >= self.limits.window {
            record.failures = 0;
            record.window_start = now;
        }
        Ok(())
    }

    fn record_failure_at(&mut self, device_id: &str, now: Instant) {
        let record = self
            .records
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord::fresh(now));

        if now.duration_since(record.window_start) >= self.limits.window {
            record.failures = 0;
            record.window_start = now;
        }

        record.failures += 1;
        if record.failures >= self.limits.max_failures {
            record.locked_until = Some(now + self.limits.lockout);
            tracing::warn!(
                device_id,
                failures = record.failures,
                lockout_secs = self.limits.lockout.as_secs(),
                "rate limit triggered, locking device"
            );
        } else {
            tracing::debug!(
                device_id,
                failures = record.failures,
                max = self.limits.max_failures,
                "verification failed"
            );
        }
    }
}
