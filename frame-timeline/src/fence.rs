use std::sync::atomic::{AtomicI64, Ordering};

/// The fence has not signaled yet.
pub const SIGNAL_TIME_PENDING: i64 = i64::MAX;
/// The fence will never carry a signal time.
pub const SIGNAL_TIME_INVALID: i64 = -1;

/// Hardware present fence as the engine consumes it. The engine polls; it
/// never blocks on a fence.
pub trait PresentFence: Send + Sync {
    /// Nanosecond timestamp at which the fence signaled, or one of
    /// [`SIGNAL_TIME_PENDING`] / [`SIGNAL_TIME_INVALID`].
    fn signal_time(&self) -> i64;

    fn is_valid(&self) -> bool {
        true
    }
}

/// Software-backed fence: starts pending and is signaled exactly once.
/// Stands in for the driver fence in tests and host-side harnesses.
pub struct FenceTime {
    signal: AtomicI64,
    valid: bool,
}

impl FenceTime {
    pub fn pending() -> Self {
        Self {
            signal: AtomicI64::new(SIGNAL_TIME_PENDING),
            valid: true,
        }
    }

    pub fn signaled(signal_time_ns: i64) -> Self {
        Self {
            signal: AtomicI64::new(signal_time_ns),
            valid: true,
        }
    }

    /// A fence that never carries a timestamp, e.g. a cycle with no hardware
    /// present feedback.
    pub fn invalid() -> Self {
        Self {
            signal: AtomicI64::new(SIGNAL_TIME_INVALID),
            valid: false,
        }
    }

    pub fn signal(&self, signal_time_ns: i64) {
        self.signal.store(signal_time_ns, Ordering::Release);
    }
}

impl PresentFence for FenceTime {
    fn signal_time(&self) -> i64 {
        self.signal.load(Ordering::Acquire)
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_fence_reports_pending_until_signaled() {
        let fence = FenceTime::pending();
        assert!(fence.is_valid());
        assert_eq!(fence.signal_time(), SIGNAL_TIME_PENDING);

        fence.signal(42);
        assert_eq!(fence.signal_time(), 42);
    }

    #[test]
    fn invalid_fence_is_not_valid() {
        let fence = FenceTime::invalid();
        assert!(!fence.is_valid());
        assert_eq!(fence.signal_time(), SIGNAL_TIME_INVALID);
    }
}
