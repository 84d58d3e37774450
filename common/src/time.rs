//! Timing constants for cluster coordination.

use std::time::Duration;

/// Default timing values.
pub mod constants {
    use super::Duration;

    /// Ceiling on waiting for a process outcome after start (60 seconds).
    pub fn poll_timeout() -> Duration {
        Duration::from_secs(60)
    }

    /// Interval between process status checks (1 second).
    pub fn poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    /// Bound on a single directory lookup, claim or release (5 seconds).
    pub fn directory_timeout() -> Duration {
        Duration::from_secs(5)
    }

    /// Connect timeout when probing a database endpoint (20 seconds).
    pub fn health_check_timeout() -> Duration {
        Duration::from_secs(20)
    }
}

/// Whole seconds in a duration, rounded up so sub-second timeouts never report 0.
pub fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_secs(60)), 60);
        assert_eq!(whole_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(whole_seconds(Duration::from_millis(10)), 1);
        assert_eq!(whole_seconds(Duration::ZERO), 0);
    }

    #[test]
    fn test_default_poll_timeout() {
        assert_eq!(constants::poll_timeout(), Duration::from_secs(60));
    }
}
