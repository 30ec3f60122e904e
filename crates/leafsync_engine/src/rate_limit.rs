//! Serialized "sleep until earliest allowed" gates for remote calls.

use crate::error::{SyncError, SyncResult};
use std::time::{Duration, Instant};
use tracing::debug;

/// Enforces a minimum delay between consecutive calls of one kind.
///
/// The remote enforces its windows server-side, so calls through a gate
/// are never skipped or run concurrently: the caller sleeps until the next
/// slot, or gets `RateLimited` when that slot is further away than its
/// timeout.
#[derive(Debug)]
pub struct RateGate {
    name: &'static str,
    min_interval: Duration,
    last_call: Option<Instant>,
}

impl RateGate {
    /// Creates a gate with the given minimum interval.
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            last_call: None,
        }
    }

    /// Time left until the next call is allowed.
    pub fn remaining(&self) -> Duration {
        match self.last_call {
            Some(last) => (last + self.min_interval).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Waits for the next slot and claims it.
    pub fn acquire(&mut self, timeout: Duration) -> SyncResult<()> {
        let wait = self.remaining();
        if wait > timeout {
            return Err(SyncError::RateLimited { retry_after: wait });
        }
        if !wait.is_zero() {
            debug!(gate = self.name, wait_ms = wait.as_millis() as u64, "waiting on rate gate");
            std::thread::sleep(wait);
        }
        self.last_call = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_passes_immediately() {
        let mut gate = RateGate::new("snapshot", Duration::from_secs(120));
        assert_eq!(gate.remaining(), Duration::ZERO);
        gate.acquire(Duration::ZERO).unwrap();
        assert!(gate.remaining() > Duration::from_secs(119));
    }

    #[test]
    fn second_call_beyond_timeout_is_rate_limited() {
        let mut gate = RateGate::new("snapshot", Duration::from_secs(120));
        gate.acquire(Duration::ZERO).unwrap();

        match gate.acquire(Duration::from_secs(1)) {
            Err(SyncError::RateLimited { retry_after }) => {
                assert!(retry_after > Duration::from_secs(100));
                assert!(retry_after <= Duration::from_secs(120));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn short_waits_sleep_through() {
        let mut gate = RateGate::new("mutation", Duration::from_millis(20));
        let start = Instant::now();
        gate.acquire(Duration::from_secs(1)).unwrap();
        gate.acquire(Duration::from_secs(1)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_interval_never_waits() {
        let mut gate = RateGate::new("mutation", Duration::ZERO);
        for _ in 0..5 {
            gate.acquire(Duration::ZERO).unwrap();
        }
    }
}
