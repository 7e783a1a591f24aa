//! Generic test utilities for script controllers
//!
//! This module provides host helpers, a recording error reporter and a macro
//! generating the standard controller suite for any host profile.
//!
//! # Usage
//!
//! In your embedder's test file:
//!
//! ```ignore
//! use openworkers_script::generate_controller_tests;
//!
//! fn my_host(base: openworkers_script::WorkerContext) -> openworkers_script::HostCapabilities {
//!     openworkers_script::HostCapabilities::shared(base, "my-worker")
//! }
//!
//! generate_controller_tests!(my_host);
//! ```

use crate::message::MessageReceiver;
use crate::report::{ErrorReporter, ExceptionReport};
use crate::{HostCapabilities, WorkerContext};
use std::sync::{Mutex, PoisonError};

/// Reporter keeping every report in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ExceptionReport>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<ExceptionReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: ExceptionReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}

/// Dedicated host whose parent port is discarded
pub fn dedicated(base: WorkerContext) -> HostCapabilities {
    HostCapabilities::dedicated(base).0
}

/// Shared host named "test"
pub fn shared(base: WorkerContext) -> HostCapabilities {
    HostCapabilities::shared(base, "test")
}

/// Dedicated host at `about:blank`, with the parent's receiver
pub fn dedicated_host() -> (HostCapabilities, MessageReceiver) {
    HostCapabilities::dedicated(WorkerContext::new(crate::ANONYMOUS_ORIGIN))
}

pub fn shared_host(name: &str) -> HostCapabilities {
    HostCapabilities::shared(WorkerContext::new(crate::ANONYMOUS_ORIGIN), name)
}

/// Generate standard controller tests for a host profile
///
/// `$host` is a function (or closure) from `WorkerContext` to
/// `HostCapabilities`. Tests cover: evaluation, exceptions and reporting,
/// suppression, single initialization, timeouts and injection.
#[macro_export]
macro_rules! generate_controller_tests {
    ($host:expr) => {
        use std::sync::Arc;
        use $crate::testing::RecordingReporter;
        use $crate::{
            EvaluationOutcome, ForbidMode, RuntimeLimits, ScriptController, ScriptError,
            SourceUnit, TerminationReason, Value, WorkerContext,
        };

        fn new_controller(limits: Option<RuntimeLimits>) -> ScriptController {
            let host = ($host)(WorkerContext::new("https://worker.test/main.js"));
            ScriptController::new(host, limits)
        }

        #[test]
        fn test_basic_evaluation() {
            let mut controller = new_controller(None);
            let outcome = controller.evaluate(&SourceUnit::new("1+1"));
            assert_eq!(outcome, EvaluationOutcome::Value(Value::Number(2.0)));
        }

        #[test]
        fn test_exception_propagation() {
            let mut controller = new_controller(None);
            match controller.evaluate(&SourceUnit::new("throw 'x'")) {
                EvaluationOutcome::Exception(ScriptError::Thrown { value, .. }) => {
                    assert_eq!(value, Value::from("x"));
                }
                other => panic!("Expected a thrown value, got {:?}", other),
            }
        }

        #[test]
        fn test_reporting_errors() {
            let reporter = Arc::new(RecordingReporter::default());
            let mut controller = new_controller(None).with_reporter(reporter.clone());

            let result = controller.evaluate_reporting_errors(&SourceUnit::new("throw 'x'"));
            assert_eq!(result, None);

            let reports = reporter.reports();
            assert_eq!(reports.len(), 1, "Reporter should be called once");
            assert_eq!(reports[0].message, "x");
        }

        #[test]
        fn test_suppression() {
            let mut controller = new_controller(None);
            controller.forbid(ForbidMode::Soft);
            controller.forbid(ForbidMode::TerminateRunningScript);
            controller.forbid(ForbidMode::Soft);

            for source in ["1", "throw 'x'", "while (true) {}"] {
                let outcome = controller.evaluate(&SourceUnit::new(source));
                assert!(outcome.is_suppressed(), "{} should be suppressed", source);
            }
            assert!(controller.is_forbidden());
        }

        #[test]
        fn test_lazy_single_init() {
            let mut controller = new_controller(None);
            assert_eq!(controller.host().base().wrapper_count(), 0);

            for _ in 0..5 {
                controller.evaluate(&SourceUnit::new("self.location"));
            }
            assert_eq!(controller.host().base().wrapper_count(), 1);
        }

        #[test]
        fn test_timeout_disarms() {
            let limits = RuntimeLimits {
                max_wall_clock_time_ms: 10,
                ..Default::default()
            };
            let mut controller = new_controller(Some(limits));

            let outcome = controller.evaluate(&SourceUnit::new("for (;;) {}"));
            assert_eq!(
                outcome.exception().and_then(ScriptError::termination_reason),
                Some(TerminationReason::WallClockTimeout)
            );

            let outcome = controller.evaluate(&SourceUnit::new("'still alive'"));
            assert_eq!(outcome, EvaluationOutcome::Value(Value::from("still alive")));
        }

        #[test]
        fn test_injection() {
            let mut controller = new_controller(None);
            controller.evaluate(&SourceUnit::new("var ran = false;"));

            let error = controller
                .create_error($crate::ErrorKind::Error, "injected")
                .expect("Environment should be initialized");
            controller.inject_exception(error).expect("Injection should succeed");

            let outcome = controller.evaluate(&SourceUnit::new("ran = true;"));
            let message = match outcome {
                EvaluationOutcome::Exception(ScriptError::Thrown { message, .. }) => message,
                other => panic!("Expected the injected error, got {:?}", other),
            };
            assert_eq!(message, "Error: injected");

            let ran = controller.evaluate(&SourceUnit::new("ran"));
            assert_eq!(ran, EvaluationOutcome::Value(Value::Bool(false)));
        }
    };
}
