//! Cross-thread execution guard
//!
//! The only state of a controller that may be touched from outside the
//! worker thread. `forbidden` gates *starting* evaluations and is always read
//! under the mutex; the terminator flag is polled by the running interpreter
//! with relaxed ordering, since a late observation only delays the abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How `ExecutionGuard::forbid` treats an evaluation already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbidMode {
    /// Refuse future evaluations, let the current one finish
    Soft,
    /// Refuse future evaluations and abort the current one at its next safe point
    TerminateRunningScript,
}

#[derive(Debug, Default)]
struct GuardState {
    forbidden: bool,
    termination_requested: bool,
}

/// Cooperative "please stop" signal polled at interpreter safe points
#[derive(Debug, Default)]
pub struct Terminator {
    should_terminate: AtomicBool,
}

impl Terminator {
    pub fn should_terminate(&self) -> bool {
        self.should_terminate.load(Ordering::Relaxed)
    }

    fn terminate_soon(&self) {
        self.should_terminate.store(true, Ordering::Relaxed);
    }
}

/// Execution guard shared between a worker thread and its controllers
///
/// Once forbidden, an environment stays forbidden.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    state: Mutex<GuardState>,
    terminator: Terminator,
}

impl ExecutionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // Two booleans can not be left half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether evaluation has been permanently forbidden
    pub fn is_forbidden(&self) -> bool {
        self.lock().forbidden
    }

    /// Whether a running script was asked to terminate
    pub fn is_termination_requested(&self) -> bool {
        self.lock().termination_requested
    }

    /// Forbid execution. Callable from any thread, any number of times.
    ///
    /// Never waits for the worker thread to actually stop.
    pub fn forbid(&self, mode: ForbidMode) {
        let mut state = self.lock();
        state.forbidden = true;
        if mode == ForbidMode::TerminateRunningScript {
            state.termination_requested = true;
            self.terminator.terminate_soon();
        }
        tracing::info!(?mode, "script execution forbidden");
    }

    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }
}
