//! Exception channel
//!
//! Inbound: the owning task parks an exception on the environment and the
//! interpreter raises it at the next safe point. Outbound: uncaught
//! exceptions of reporting evaluations go to an `ErrorReporter`.

use crate::{ErrorKind, Value};
use std::cell::RefCell;
use std::sync::Arc;

/// Uncaught exception forwarded to the error log
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionReport {
    /// The thrown value; object handles stay valid until the next evaluation
    pub value: Value,
    /// Builtin error class, when the value is an error object
    pub kind: Option<ErrorKind>,
    /// Exception rendered the way `String(value)` would
    pub message: String,
    pub source_url: String,
    pub line: u32,
}

/// Error-log sink, implemented by the host
///
/// Called on the worker thread, but the same reporter may be shared by
/// controllers living on several worker threads.
pub trait ErrorReporter: Send + Sync {
    /// Default: logs through `tracing`
    fn report(&self, report: ExceptionReport) {
        tracing::error!(
            source_url = %report.source_url,
            line = report.line,
            "Uncaught {}",
            report.message
        );
    }
}

/// Arc wrapper for ErrorReporter trait object
pub type ReporterHandle = Arc<dyn ErrorReporter>;

/// Reporter using the default trait method
pub struct DefaultReporter;

impl ErrorReporter for DefaultReporter {}

/// Exception waiting for the next safe point
///
/// Only one can be pending; injecting again replaces it.
#[derive(Debug, Default)]
pub(crate) struct PendingException {
    slot: RefCell<Option<Value>>,
}

impl PendingException {
    pub(crate) fn set(&self, value: Value) {
        *self.slot.borrow_mut() = Some(value);
    }

    pub(crate) fn take(&self) -> Option<Value> {
        self.slot.borrow_mut().take()
    }

    /// The pending value, left in place
    pub(crate) fn peek(&self) -> Option<Value> {
        self.slot.borrow().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_taken_once() {
        let pending = PendingException::default();
        pending.set(Value::from("first"));
        pending.set(Value::from("second"));

        assert!(pending.is_set());
        assert_eq!(pending.peek(), Some(Value::from("second")));
        assert_eq!(pending.take(), Some(Value::from("second")));
        assert_eq!(pending.take(), None);
    }
}
