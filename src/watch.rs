//! Timeout/termination enforcement for a single evaluation
//!
//! `TimeoutChecker::start` arms the environment's clock and returns an
//! `ArmedWatch`; dropping the watch disarms it, so every exit path of an
//! evaluation (normal, thrown or aborted) leaves the checker idle.

use crate::guard::Terminator;
use crate::{RuntimeLimits, TerminationReason};
use std::cell::Cell;
use std::time::{Duration, Instant};

/// Safe points between two reads of the clock
const CLOCK_CHECK_INTERVAL: u32 = 128;

#[derive(Debug)]
pub(crate) struct TimeoutChecker {
    budget: Option<Duration>,
    deadline: Cell<Option<Instant>>,
    armed: Cell<bool>,
}

impl TimeoutChecker {
    pub(crate) fn new(limits: &RuntimeLimits) -> Self {
        Self {
            budget: limits.wall_clock_budget(),
            deadline: Cell::new(None),
            armed: Cell::new(false),
        }
    }

    pub(crate) fn start<'a>(&'a self, terminator: &'a Terminator) -> ArmedWatch<'a> {
        self.deadline.set(self.budget.map(|budget| Instant::now() + budget));
        self.armed.set(true);
        ArmedWatch {
            checker: self,
            terminator,
            ticks: Cell::new(0),
        }
    }

    fn stop(&self) {
        self.deadline.set(None);
        self.armed.set(false);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.get()
    }
}

/// Armed enforcement scope, polled by the interpreter at safe points
pub(crate) struct ArmedWatch<'a> {
    checker: &'a TimeoutChecker,
    terminator: &'a Terminator,
    ticks: Cell<u32>,
}

impl ArmedWatch<'_> {
    /// Returns the reason to abort, if any
    pub(crate) fn poll(&self) -> Option<TerminationReason> {
        if self.terminator.should_terminate() {
            return Some(TerminationReason::Terminated);
        }

        let ticks = self.ticks.get().wrapping_add(1);
        self.ticks.set(ticks);
        if ticks % CLOCK_CHECK_INTERVAL != 0 {
            return None;
        }

        match self.checker.deadline.get() {
            Some(deadline) if Instant::now() >= deadline => {
                Some(TerminationReason::WallClockTimeout)
            }
            _ => None,
        }
    }
}

impl Drop for ArmedWatch<'_> {
    fn drop(&mut self) {
        self.checker.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionGuard, ForbidMode};

    fn limits(ms: u64) -> RuntimeLimits {
        RuntimeLimits {
            max_wall_clock_time_ms: ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_drop_disarms() {
        let guard = ExecutionGuard::new();
        let checker = TimeoutChecker::new(&limits(1000));

        {
            let _watch = checker.start(guard.terminator());
            assert!(checker.is_armed());
        }

        assert!(!checker.is_armed());
    }

    #[test]
    fn test_terminator_is_observed_on_next_poll() {
        let guard = ExecutionGuard::new();
        let checker = TimeoutChecker::new(&limits(0));
        let watch = checker.start(guard.terminator());

        assert_eq!(watch.poll(), None);
        guard.forbid(ForbidMode::TerminateRunningScript);
        assert_eq!(watch.poll(), Some(TerminationReason::Terminated));
    }

    #[test]
    fn test_deadline_expires() {
        let guard = ExecutionGuard::new();
        let checker = TimeoutChecker::new(&limits(1));
        let watch = checker.start(guard.terminator());

        std::thread::sleep(Duration::from_millis(5));

        let reason = (0..CLOCK_CHECK_INTERVAL).find_map(|_| watch.poll());
        assert_eq!(reason, Some(TerminationReason::WallClockTimeout));
    }

    #[test]
    fn test_disabled_budget_never_expires() {
        let guard = ExecutionGuard::new();
        let checker = TimeoutChecker::new(&limits(0));
        let watch = checker.start(guard.terminator());

        assert!((0..CLOCK_CHECK_INTERVAL * 4).all(|_| watch.poll().is_none()));
    }
}
