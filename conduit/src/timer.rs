use std::time::{Duration, Instant};

/// Tracks when `Manager::sweep_timeouts` was last run so an event loop with no dedicated timer
/// thread (e.g. `mio`'s poll-with-timeout) can drive it from its own periodic wakeup instead.
/// Carries no reference to the `Manager` itself — callers own that call.
pub struct SweepScheduler {
    cadence: Duration,
    last_swept: Instant,
}

impl SweepScheduler {
    /// `cadence` should be at or below the Manager's retry interval; a slower cadence lets
    /// entries sit well past their nominal retry time before being retried or dropped.
    pub fn new(cadence: Duration) -> SweepScheduler {
        SweepScheduler {
            cadence,
            last_swept: Instant::now(),
        }
    }

    /// True once `cadence` has elapsed since the last call to `mark_swept`.
    pub fn due(&self) -> bool {
        self.last_swept.elapsed() >= self.cadence
    }

    /// Call immediately after running the sweep.
    pub fn mark_swept(&mut self) {
        self.last_swept = Instant::now();
    }

    /// How long the caller's poll should block for at most, so a sweep is never more than
    /// `cadence` late. Useful as the timeout argument to `mio::Poll::poll`.
    pub fn poll_timeout(&self) -> Duration {
        self.cadence.saturating_sub(self.last_swept.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_immediately_after_construction() {
        let scheduler = SweepScheduler::new(Duration::from_millis(500));
        assert!(!scheduler.due());
    }

    #[test]
    fn due_after_cadence_elapses() {
        let mut scheduler = SweepScheduler::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(scheduler.due());

        scheduler.mark_swept();
        assert!(!scheduler.due());
    }
}
