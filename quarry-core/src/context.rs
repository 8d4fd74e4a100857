//! Execution context passed through every persistence call

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Name of the default shard.
pub const PRIMARY_SHARD: &str = "primary";

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Shard and clock for one caller.
#[derive(Clone)]
pub struct ExecCxt {
    pub shard: String,
    clock: Arc<dyn Clock>,
}

impl ExecCxt {
    pub fn new(shard: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn primary() -> Self {
        Self::new(PRIMARY_SHARD)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_primary_shard(&self) -> bool {
        self.shard == PRIMARY_SHARD
    }
}

impl Default for ExecCxt {
    fn default() -> Self {
        Self::primary()
    }
}

impl fmt::Debug for ExecCxt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecCxt").field("shard", &self.shard).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let cxt = ExecCxt::new("east").with_clock(clock.clone());
        assert_eq!(cxt.now(), start);
        clock.advance(Duration::milliseconds(5));
        assert_eq!(cxt.now(), start + Duration::milliseconds(5));
        assert!(!cxt.is_primary_shard());
    }

    #[test]
    fn test_default_is_primary() {
        assert!(ExecCxt::default().is_primary_shard());
    }
}
