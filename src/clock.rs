//! Time source and TTL helpers
//!
//! All expiry arithmetic is done in epoch milliseconds. Components take an
//! `Arc<dyn Clock>` so tests can drive expiry with [`ManualClock`] instead of
//! sleeping.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for deterministic tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start_millis`
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    /// Create a clock frozen at the current wall time
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now_millis())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let by = duration_millis(by);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(by))
            });
    }

    /// Jump to an absolute time
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Milliseconds in `duration`, clamped to `i64::MAX`
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Compute the expiry timestamp for a TTL.
///
/// `None` or a zero TTL means the entry never expires.
pub fn expiry_from_ttl(now_millis: i64, ttl: Option<Duration>) -> Option<i64> {
    match ttl {
        Some(ttl) if !ttl.is_zero() => Some(now_millis.saturating_add(duration_millis(ttl))),
        _ => None,
    }
}

/// An entry is visible only while `expiry > now`; `None` never expires.
pub fn is_expired(expiry: Option<i64>, now_millis: i64) -> bool {
    matches!(expiry, Some(at) if at <= now_millis)
}

/// Remaining lifetime of an entry, `None` if it never expires or already expired
pub fn time_to_live(expiry: Option<i64>, now_millis: i64) -> Option<Duration> {
    let at = expiry?;
    if at <= now_millis {
        return None;
    }
    Some(Duration::from_millis((at - now_millis) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_ttl() {
        assert_eq!(expiry_from_ttl(1_000, Some(Duration::from_secs(1))), Some(2_000));
        assert_eq!(expiry_from_ttl(1_000, None), None);
        assert_eq!(expiry_from_ttl(1_000, Some(Duration::ZERO)), None);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let now = SystemClock.now_millis();
        let expiry = expiry_from_ttl(now, Some(Duration::from_millis(u64::MAX)));
        assert_eq!(expiry, Some(i64::MAX));
        assert!(!is_expired(expiry, now));

        assert_eq!(expiry_from_ttl(now, Some(Duration::MAX)), Some(i64::MAX));
        assert_eq!(duration_millis(Duration::from_millis(u64::MAX)), i64::MAX);
        assert_eq!(duration_millis(Duration::from_secs(2)), 2_000);
    }

    #[test]
    fn test_is_expired_boundary() {
        assert!(!is_expired(None, i64::MAX));
        assert!(!is_expired(Some(2_000), 1_999));
        // expiry must be strictly in the future to be visible
        assert!(is_expired(Some(2_000), 2_000));
        assert!(is_expired(Some(2_000), 2_001));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_millis(), 10);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 260);

        clock.set(5);
        assert_eq!(clock.now_millis(), 5);

        clock.advance(Duration::MAX);
        assert_eq!(clock.now_millis(), i64::MAX);
    }

    #[test]
    fn test_time_to_live() {
        assert_eq!(time_to_live(Some(1_500), 1_000), Some(Duration::from_millis(500)));
        assert_eq!(time_to_live(Some(1_000), 1_000), None);
        assert_eq!(time_to_live(None, 1_000), None);
    }
}
