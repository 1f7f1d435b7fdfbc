//! The deadline watcher: a monotonic-clock cooperative timeout driven by a
//! per-instruction fetch hook.
//!
//! The guest VM calls the hook on every bytecode fetch. Checking the clock
//! on every single fetch would dominate interpreter overhead, so the hook
//! only samples the clock once every `interval` fetches; `interval` bounds
//! the worst-case overshoot of the configured timeout.

use std::time::{Duration, Instant};

/// Per-session deadline state, armed once per `eval` by [`DeadlineWatcher::begin`].
#[derive(Debug)]
pub struct DeadlineWatcher {
    deadline: Option<Instant>,
    expired: bool,
    check_counter: u32,
    interval: u32,
}

impl DeadlineWatcher {
    /// Creates a disarmed watcher with the given fetch-hook sampling
    /// interval.
    pub fn new(interval: u32) -> Self {
        Self {
            deadline: None,
            expired: false,
            check_counter: 0,
            interval,
        }
    }

    /// Arms the watcher for one `eval`. `timeout_seconds <= 0.0` disables
    /// the deadline (and the hook should not be installed at all in that
    /// case — see `Session::eval`).
    pub fn begin(&mut self, timeout_seconds: f64) {
        self.expired = false;
        self.check_counter = 0;
        self.deadline = if timeout_seconds > 0.0 {
            Some(Instant::now() + Duration::from_secs_f64(timeout_seconds))
        } else {
            None
        };
    }

    /// `true` once the configured deadline was armed (i.e. the fetch hook
    /// should be installed for this eval).
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// `true` once the deadline has been observed to have passed during
    /// this eval.
    pub fn expired(&self) -> bool {
        self.expired
    }

    /// Called by the fetch hook on every bytecode fetch. Returns `true`
    /// exactly once, on the fetch where the deadline is first observed to
    /// have passed; the caller raises the guest-level timeout exception on
    /// that transition and must not call `on_fetch` again until the next
    /// `begin`. Cheap on every other fetch: only every `interval`-th call
    /// reads the clock at all.
    pub fn on_fetch(&mut self) -> bool {
        if self.expired {
            return false;
        }
        let Some(deadline) = self.deadline else {
            return false;
        };
        self.check_counter += 1;
        if self.check_counter < self.interval {
            return false;
        }
        self.check_counter = 0;
        if Instant::now() >= deadline {
            self.expired = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn disabled_when_timeout_is_zero() {
        let mut watcher = DeadlineWatcher::new(4);
        watcher.begin(0.0);
        assert!(!watcher.is_armed());
        for _ in 0..100 {
            assert!(!watcher.on_fetch());
        }
    }

    #[test]
    fn does_not_sample_clock_before_interval() {
        let mut watcher = DeadlineWatcher::new(1024);
        watcher.begin(0.0000001);
        // Even though the deadline has surely passed by now, the hook only
        // samples the clock every `interval` fetches.
        sleep(Duration::from_millis(5));
        for _ in 0..1023 {
            assert!(!watcher.on_fetch());
        }
        assert!(watcher.on_fetch());
    }

    #[test]
    fn expires_exactly_once() {
        let mut watcher = DeadlineWatcher::new(1);
        watcher.begin(0.0000001);
        sleep(Duration::from_millis(5));
        assert!(watcher.on_fetch());
        assert!(!watcher.on_fetch());
        assert!(watcher.expired());
    }
}
