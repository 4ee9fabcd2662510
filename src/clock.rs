// Clock - Loop pacing
//
// One clock per scheduling loop (update thread, render thread). The clock
// is never shared between threads.

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic cycle pacer.
///
/// `a` is sampled when a cycle's work ends, `b` when the following sleep ends.
#[derive(Debug)]
pub struct Clock {
    a: Instant,
    b: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { a: now, b: now }
    }

    /// Sleeps if the work since the previous call finished under budget.
    ///
    /// Only half of `min_ms_per_cycle` is spent here; the other half is left
    /// for the caller's next unit of work. The remaining time is rounded down
    /// to whole milliseconds. When the work already overran the budget the
    /// call returns immediately and the loop free-runs.
    ///
    /// Returns the instantaneous rate in cycles per second, computed as
    /// `1000 / (work_ms + sleep_ms)`.
    pub fn sleep(&mut self, min_ms_per_cycle: f64) -> f32 {
        let budget_ms = min_ms_per_cycle / 2.0;

        self.a = Instant::now();
        let work_ms = self.a.duration_since(self.b).as_secs_f64() * 1000.0;

        if work_ms < budget_ms {
            let remaining = (budget_ms - work_ms).floor() as u64;
            if remaining > 0 {
                thread::sleep(Duration::from_millis(remaining));
            }
        }

        self.b = Instant::now();
        let sleep_ms = self.b.duration_since(self.a).as_secs_f64() * 1000.0;

        (1000.0 / (work_ms + sleep_ms)) as f32
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_blocks_for_half_the_budget_when_idle() {
        let mut clock = Clock::new();
        clock.sleep(0.0);

        let started = Instant::now();
        let rate = clock.sleep(20.0);
        let blocked = started.elapsed();

        // 10ms half-budget, minus at most 1ms of rounding
        assert!(blocked >= Duration::from_millis(9), "blocked for {:?}", blocked);
        assert!(rate < 1000.0 / 8.0, "rate {}", rate);
    }

    #[test]
    fn test_sleep_does_not_block_after_overrun() {
        let mut clock = Clock::new();
        clock.sleep(0.0);

        thread::sleep(Duration::from_millis(25));
        let started = Instant::now();
        let rate = clock.sleep(20.0);

        assert!(started.elapsed() < Duration::from_millis(5));
        // Reported rate reflects the overrun work alone
        assert!(rate <= 1000.0 / 25.0 + 1.0, "rate {}", rate);
        assert!(rate > 0.0);
    }

    #[test]
    fn test_work_between_half_and_full_budget_skips_sleep() {
        let mut clock = Clock::new();
        clock.sleep(0.0);

        // Over the 15ms half-budget, under the full 30ms
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        let rate = clock.sleep(30.0);

        assert!(started.elapsed() < Duration::from_millis(5));
        // Faster than the nominal ~33 Hz, bounded by the work alone
        assert!(rate > 1000.0 / 30.0, "rate {}", rate);
        assert!(rate <= 1000.0 / 20.0 + 1.0, "rate {}", rate);
    }

    #[test]
    fn test_samples_advance_monotonically() {
        let mut clock = Clock::new();
        let mut last_b = clock.b;
        for _ in 0..5 {
            clock.sleep(2.0);
            assert!(clock.a >= last_b);
            assert!(clock.b >= clock.a);
            last_b = clock.b;
        }
    }

    #[test]
    fn test_zero_budget_free_runs() {
        let mut clock = Clock::new();
        let started = Instant::now();
        for _ in 0..100 {
            clock.sleep(0.0);
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
