use crate::context::{HostCapabilities, WorkerKind};
use crate::environment::ScriptEnvironment;
use crate::error::{ScriptError, UsageError};
use crate::guard::{ExecutionGuard, ForbidMode};
use crate::heap::ErrorKind;
use crate::interpreter::Completion;
use crate::message::MessagePort;
use crate::report::{DefaultReporter, ExceptionReport, ReporterHandle};
use crate::watch::TimeoutChecker;
use crate::{RuntimeLimits, SourceUnit, Value};
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// What an evaluation produced
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Completion value of the source, or the value of a top-level `return`
    Value(Value),
    /// Uncaught throw or abort at a safe point
    Exception(ScriptError),
    /// Execution is forbidden; nothing ran
    Suppressed,
}

impl EvaluationOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            EvaluationOutcome::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&ScriptError> {
        match self {
            EvaluationOutcome::Exception(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, EvaluationOutcome::Suppressed)
    }

    pub fn is_termination(&self) -> bool {
        self.exception().is_some_and(ScriptError::is_termination)
    }
}

/// Where uncaught script exceptions go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Return them to the caller, who may re-raise them
    Propagate,
    /// Also hand them to the error reporter
    Report,
}

/// Runs source units inside one worker's script environment
///
/// Everything except the execution guard belongs to the worker thread: the
/// environment holds `Rc` scopes, so the controller is neither `Send` nor
/// `Sync`. Other threads hold an `Arc<ExecutionGuard>` obtained through
/// `execution_guard()` and call `forbid` on it.
pub struct ScriptController {
    guard: Arc<ExecutionGuard>,
    environment: ScriptEnvironment,
    timeout: TimeoutChecker,
    host: HostCapabilities,
    reporter: ReporterHandle,
}

impl ScriptController {
    /// Create a controller; the environment is initialized on first use
    pub fn new(host: HostCapabilities, limits: Option<RuntimeLimits>) -> Self {
        let limits = limits.unwrap_or_default();
        Self {
            guard: Arc::new(ExecutionGuard::new()),
            environment: ScriptEnvironment::new(&limits),
            timeout: TimeoutChecker::new(&limits),
            host,
            reporter: Arc::new(DefaultReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = reporter;
        self
    }

    /// Share a guard created before the worker thread started
    pub fn with_guard(mut self, guard: Arc<ExecutionGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Handle for controller threads
    pub fn execution_guard(&self) -> Arc<ExecutionGuard> {
        self.guard.clone()
    }

    pub fn forbid(&self, mode: ForbidMode) {
        self.guard.forbid(mode);
    }

    pub fn is_forbidden(&self) -> bool {
        self.guard.is_forbidden()
    }

    pub fn host(&self) -> &HostCapabilities {
        &self.host
    }

    pub fn environment(&self) -> &ScriptEnvironment {
        &self.environment
    }

    /// Evaluate and hand any uncaught exception back to the caller
    pub fn evaluate(&mut self, source: &SourceUnit) -> EvaluationOutcome {
        self.evaluate_with(source, ErrorPolicy::Propagate)
    }

    /// Evaluate a top-level worker script
    ///
    /// Uncaught exceptions go to the error reporter and yield `None`.
    pub fn evaluate_reporting_errors(&mut self, source: &SourceUnit) -> Option<Value> {
        self.evaluate_with(source, ErrorPolicy::Report).into_value()
    }

    pub fn evaluate_with(&mut self, source: &SourceUnit, policy: ErrorPolicy) -> EvaluationOutcome {
        if self.guard.is_forbidden() {
            tracing::debug!(origin = %source.origin_url, "evaluation suppressed");
            return EvaluationOutcome::Suppressed;
        }

        let completion = {
            let watch = self.timeout.start(self.guard.terminator());
            self.environment.run(&self.host, source, &watch)
        };
        debug_assert!(!self.timeout.is_armed());
        self.classify(completion, &source.origin_url, policy)
    }

    /// Raise `value` at the next safe point of this environment
    pub fn inject_exception(&self, value: Value) -> Result<(), UsageError> {
        self.environment.inject_exception(value)
    }

    /// Build an error value in this environment, e.g. for injection
    pub fn create_error(&mut self, kind: ErrorKind, message: &str) -> Result<Value, UsageError> {
        self.environment.ensure_initialized(&self.host);
        self.environment.create_error(kind, message)
    }

    pub fn describe(&self, value: &Value) -> String {
        self.environment.describe(value)
    }

    /// Deliver a message from the parent to the script's `onmessage`
    ///
    /// A payload that is not valid JSON raises a `DataCloneError` inside the
    /// script instead; the handler still runs unless that error escapes first.
    pub fn deliver_message(&mut self, payload: Bytes) -> Result<EvaluationOutcome, UsageError> {
        self.require_kind(WorkerKind::Dedicated)?;
        if self.guard.is_forbidden() {
            return Ok(EvaluationOutcome::Suppressed);
        }

        self.environment.ensure_initialized(&self.host);
        let data = match serde_json::from_slice::<JsonValue>(&payload) {
            Ok(data) => Some(data),
            Err(err) => {
                tracing::debug!(%err, len = payload.len(), "message payload could not be decoded");
                let error = self.environment.create_error(
                    ErrorKind::DataCloneError,
                    &format!("Failed to deserialize message: {err}"),
                )?;
                self.environment.inject_exception(error)?;
                None
            }
        };

        let completion = {
            let watch = self.timeout.start(self.guard.terminator());
            self.environment
                .dispatch_message(&self.host, &watch, data.as_ref())
        };
        Ok(self.classify(completion, self.host.base().location(), ErrorPolicy::Report))
    }

    /// Connect a new port to a shared worker and fire `onconnect`
    pub fn dispatch_connect(&mut self, port: MessagePort) -> Result<EvaluationOutcome, UsageError> {
        let context = match &self.host {
            HostCapabilities::Shared(context) => context.clone(),
            other => {
                return Err(UsageError::WrongWorkerKind {
                    expected: WorkerKind::Shared,
                    actual: other.kind(),
                });
            }
        };
        if self.guard.is_forbidden() {
            return Ok(EvaluationOutcome::Suppressed);
        }

        let index = context.connect(port);
        let completion = {
            let watch = self.timeout.start(self.guard.terminator());
            self.environment.dispatch_connect(&self.host, &watch, index)
        };
        Ok(self.classify(completion, self.host.base().location(), ErrorPolicy::Report))
    }

    /// Tear down the environment; the guard stays valid for other holders
    pub fn dispose(self) {
        self.environment.dispose();
    }

    fn require_kind(&self, expected: WorkerKind) -> Result<(), UsageError> {
        let actual = self.host.kind();
        if actual != expected {
            return Err(UsageError::WrongWorkerKind { expected, actual });
        }
        Ok(())
    }

    fn classify(
        &self,
        completion: Completion,
        source_url: &str,
        policy: ErrorPolicy,
    ) -> EvaluationOutcome {
        let error = match completion {
            Completion::Normal(value) | Completion::Return(value) => {
                return EvaluationOutcome::Value(value);
            }
            Completion::Throw { value, line } => {
                let message = self.environment.describe(&value);
                if policy == ErrorPolicy::Report {
                    self.reporter.report(ExceptionReport {
                        value: value.clone(),
                        kind: self.environment.heap().error_kind(&value),
                        message: message.clone(),
                        source_url: source_url.to_string(),
                        line,
                    });
                }
                ScriptError::Thrown {
                    value,
                    message,
                    line,
                }
            }
            Completion::Terminated(reason) => {
                tracing::warn!(%reason, source_url, "evaluation terminated");
                ScriptError::Terminated(reason)
            }
        };
        EvaluationOutcome::Exception(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingReporter, dedicated_host, shared_host};
    use crate::{LogLevel, TerminationReason};
    use serde_json::json;

    fn controller() -> ScriptController {
        let (host, _rx) = dedicated_host();
        ScriptController::new(host, None)
    }

    fn eval(controller: &mut ScriptController, source: &str) -> EvaluationOutcome {
        controller.evaluate(&SourceUnit::new(source))
    }

    fn value(controller: &mut ScriptController, source: &str) -> Value {
        match eval(controller, source) {
            EvaluationOutcome::Value(value) => value,
            other => panic!("expected a value, got {other:?}"),
        }
    }

    fn thrown(controller: &mut ScriptController, source: &str) -> String {
        match eval(controller, source) {
            EvaluationOutcome::Exception(ScriptError::Thrown { message, .. }) => message,
            other => panic!("expected a throw, got {other:?}"),
        }
    }

    #[test]
    fn test_basic_evaluation() {
        let mut controller = controller();
        assert_eq!(value(&mut controller, "1+1"), Value::Number(2.0));
        assert_eq!(value(&mut controller, ""), Value::Undefined);
    }

    #[test]
    fn test_throw_propagates() {
        let mut controller = controller();
        match eval(&mut controller, "throw 'x'") {
            EvaluationOutcome::Exception(ScriptError::Thrown { value, message, line }) => {
                assert_eq!(value, Value::from("x"));
                assert_eq!(message, "x");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // a throw does not forbid later evaluations
        assert_eq!(value(&mut controller, "2*3"), Value::Number(6.0));
    }

    #[test]
    fn test_reporting_errors_calls_sink_once() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut controller = controller().with_reporter(reporter.clone());

        let source =
            SourceUnit::with_origin("let a = 1;\nthrow 'x'", "https://w.test/main.js", 10);
        assert_eq!(controller.evaluate_reporting_errors(&source), None);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].value, Value::from("x"));
        assert_eq!(reports[0].kind, None);
        assert_eq!(reports[0].message, "x");
        assert_eq!(reports[0].source_url, "https://w.test/main.js");
        assert_eq!(reports[0].line, 11);
    }

    #[test]
    fn test_report_carries_exception_kind() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut controller = controller().with_reporter(reporter.clone());

        let source = SourceUnit::new("throw new TypeError('bad')");
        assert_eq!(controller.evaluate_reporting_errors(&source), None);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, Some(ErrorKind::TypeError));
        assert_eq!(reports[0].message, "TypeError: bad");
        assert_eq!(controller.describe(&reports[0].value), "TypeError: bad");
    }

    #[test]
    fn test_line_numbers_saturate() {
        let mut controller = controller();
        let source = SourceUnit::with_origin("1;\nthrow 'x'", "a.js", u32::MAX);
        match controller.evaluate(&source) {
            EvaluationOutcome::Exception(ScriptError::Thrown { line, .. }) => {
                assert_eq!(line, u32::MAX);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_propagate_does_not_report() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut controller = controller().with_reporter(reporter.clone());

        assert!(eval(&mut controller, "throw new TypeError('bad')").exception().is_some());
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_reporting_errors_returns_value() {
        let mut controller = controller();
        let result = controller.evaluate_reporting_errors(&SourceUnit::new("'ok'"));
        assert_eq!(result, Some(Value::from("ok")));
    }

    #[test]
    fn test_suppressed_after_forbid() {
        let mut controller = controller();
        controller.forbid(ForbidMode::Soft);

        assert!(eval(&mut controller, "1").is_suppressed());
        assert!(eval(&mut controller, "while (true) {}").is_suppressed());
        assert!(eval(&mut controller, "throw 'x'").is_suppressed());
        // suppressed evaluations never touch the environment
        assert!(controller.environment().global().is_none());
    }

    #[test]
    fn test_lazy_single_initialization() {
        let (host, _rx) = dedicated_host();
        let mut controller = ScriptController::new(host.clone(), None);
        assert_eq!(host.base().wrapper_count(), 0);

        value(&mut controller, "var counter = 0;");
        for _ in 0..5 {
            value(&mut controller, "counter++");
        }

        assert_eq!(value(&mut controller, "counter"), Value::Number(5.0));
        assert_eq!(host.base().wrapper_count(), 1);
    }

    #[test]
    fn test_globals_persist_between_evaluations() {
        let mut controller = controller();
        value(&mut controller, "let total = 40; function add(n) { total += n; return total; }");
        assert_eq!(value(&mut controller, "add(2)"), Value::Number(42.0));
        assert_eq!(value(&mut controller, "self.add === add"), Value::Bool(true));
    }

    #[test]
    fn test_top_level_return() {
        let mut controller = controller();
        assert_eq!(value(&mut controller, "1; return 7; 9"), Value::Number(7.0));
    }

    #[test]
    fn test_wall_clock_timeout() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            max_wall_clock_time_ms: 20,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));

        let outcome = eval(&mut controller, "try { while (true) {} } finally { 1 }");
        assert_eq!(
            outcome,
            EvaluationOutcome::Exception(ScriptError::Terminated(
                TerminationReason::WallClockTimeout
            ))
        );
        // the watch was disarmed; timeouts do not forbid
        assert!(!controller.is_forbidden());
        assert_eq!(value(&mut controller, "1+2"), Value::Number(3.0));
    }

    #[test]
    fn test_memory_limit() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            heap_max_objects: 100,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));

        let outcome = eval(&mut controller, "let keep = []; while (true) { keep.push({}); }");
        assert_eq!(
            outcome.exception().and_then(ScriptError::termination_reason),
            Some(TerminationReason::MemoryLimit)
        );
    }

    #[test]
    fn test_call_depth_is_catchable() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            max_call_depth: 24,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));
        let source =
            "function f() { return f(); }\ntry { f(); } catch (e) { e.name + ': ' + e.message }";
        assert_eq!(
            value(&mut controller, source),
            Value::from("RangeError: Maximum call stack size exceeded")
        );
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let mut controller = controller();
        let source = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        let message = thrown(&mut controller, &source);
        assert_eq!(message, "SyntaxError: Maximum nesting depth exceeded");

        let source = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(value(&mut controller, &source), Value::Number(1.0));
    }

    #[test]
    fn test_native_recursion_is_bounded() {
        // debug builds use large frames, give the recursion a roomy stack
        let worker = std::thread::Builder::new()
            .stack_size(256 << 20)
            .spawn(|| {
                let (host, _rx) = dedicated_host();
                let limits = RuntimeLimits {
                    max_call_depth: 1_000_000,
                    ..Default::default()
                };
                let mut controller = ScriptController::new(host, Some(limits));
                let source = "function f(n) { return f(n + 1); }\n\
                              try { f(0); } catch (e) { e.name + ': ' + e.message }";
                let recursion = controller.evaluate(&SourceUnit::new(source));
                // a long operator chain parses flat but evaluates deep
                let chain = format!("1{}", " + 1".repeat(5_000));
                let source = format!("try {{ {chain} }} catch (e) {{ e.message }}");
                let chain = controller.evaluate(&SourceUnit::new(source));
                (recursion, chain)
            })
            .unwrap();

        let (recursion, chain) = worker.join().unwrap();
        assert_eq!(
            recursion,
            EvaluationOutcome::Value(Value::from("RangeError: Maximum call stack size exceeded"))
        );
        assert_eq!(
            chain,
            EvaluationOutcome::Value(Value::from("Maximum call stack size exceeded"))
        );
    }

    #[test]
    fn test_garbage_is_collected_between_evaluations() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            heap_max_objects: 50,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));
        value(
            &mut controller,
            "var kept = { n: 0 };\n\
             var read = (function () {\n\
                 var box = { v: 7 };\n\
                 return function () { return box.v; };\n\
             })();",
        );

        for _ in 0..500 {
            assert_eq!(value(&mut controller, "({}); 1"), Value::Number(1.0));
        }
        for _ in 0..100 {
            value(&mut controller, "({ a: [1, 2, 3] }); kept.n++");
        }

        assert_eq!(value(&mut controller, "kept.n"), Value::Number(100.0));
        assert_eq!(value(&mut controller, "read()"), Value::Number(7.0));
        assert!(controller.environment().heap().used_slots() <= 50);
    }

    #[test]
    fn test_connections_are_collected() {
        let limits = RuntimeLimits {
            heap_max_objects: 40,
            ..Default::default()
        };
        let mut controller = ScriptController::new(shared_host("hub"), Some(limits));
        value(&mut controller, "var count = 0; onconnect = function (e) { count++; };");

        for _ in 0..200 {
            let (port, _rx) = MessagePort::channel();
            let outcome = controller.dispatch_connect(port).unwrap();
            assert_eq!(outcome, EvaluationOutcome::Value(Value::Undefined));
        }

        assert_eq!(value(&mut controller, "count"), Value::Number(200.0));
        assert!(controller.environment().heap().len() < 100);
    }

    #[test]
    fn test_string_growth_is_bounded() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            max_string_length: 1024,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));

        let source = "var s = 'x';\n\
                      try { while (true) s = s + s; }\n\
                      catch (e) { e.name + ': ' + e.message + ' ' + s.length }";
        assert_eq!(
            value(&mut controller, source),
            Value::from("RangeError: Invalid string length 1024")
        );

        let source = "var parts = [];\nfor (var i = 0; i < 1000; i++) parts.push('ab');\n\
                      try { parts.join(''); } catch (e) { e.message }";
        assert_eq!(value(&mut controller, source), Value::from("Invalid string length"));
    }

    #[test]
    fn test_array_growth_hits_memory_limit() {
        let (host, _rx) = dedicated_host();
        let limits = RuntimeLimits {
            heap_max_objects: 1000,
            ..Default::default()
        };
        let mut controller = ScriptController::new(host, Some(limits));

        let outcome = eval(&mut controller, "var a = []; while (true) a.push(1);");
        assert_eq!(
            outcome.exception().and_then(ScriptError::termination_reason),
            Some(TerminationReason::MemoryLimit)
        );
    }

    #[test]
    fn test_injection_is_caught_by_script() {
        let mut controller = controller();
        assert_eq!(
            controller.inject_exception(Value::from("early")),
            Err(UsageError::NotInitialized)
        );

        let error = controller.create_error(ErrorKind::Error, "from host").unwrap();
        controller.inject_exception(error).unwrap();

        let source =
            "let seen = 'none';\ntry { seen = 'body'; } catch (e) { seen = e.message; }\nseen";
        // the first statement boundary raises the injected error, before `let` runs
        assert_eq!(thrown(&mut controller, source), "Error: from host");
        assert!(!controller.environment().has_pending_exception());

        value(&mut controller, "var log = [];");
        let error = controller.create_error(ErrorKind::Error, "late").unwrap();
        controller.inject_exception(error).unwrap();
        let source = "try { log.push('a'); } catch (e) { log.push(e.message); }";
        assert_eq!(thrown(&mut controller, source), "Error: late");
        assert_eq!(value(&mut controller, "log.length"), Value::Number(0.0));
    }

    #[test]
    fn test_injected_primitive() {
        let mut controller = controller();
        value(&mut controller, "0");
        controller.inject_exception(Value::from("stop")).unwrap();
        assert_eq!(thrown(&mut controller, "1"), "stop");
    }

    #[test]
    fn test_syntax_error_is_thrown() {
        let mut controller = controller();
        let source = SourceUnit::with_origin("\n\nthis is not valid javascript", "a.js", 5);
        match controller.evaluate(&source) {
            EvaluationOutcome::Exception(ScriptError::Thrown { message, line, .. }) => {
                assert!(message.starts_with("SyntaxError"), "{message}");
                assert_eq!(line, 7);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_language_subset() {
        let mut controller = controller();
        let cases = [
            ("typeof undeclared", Value::from("undefined")),
            ("typeof function () {}", Value::from("function")),
            ("null == undefined", Value::Bool(true)),
            ("'1' == 1", Value::Bool(true)),
            ("'1' === 1", Value::Bool(false)),
            ("'b' > 'a'", Value::Bool(true)),
            ("1 + '2'", Value::from("12")),
            ("[1, [2, 3]].length", Value::Number(2.0)),
            ("'héllo'.length", Value::Number(5.0)),
            ("var a = [1, 2]; a[3] = 4; a.join('-')", Value::from("1-2--4")),
            (
                "JSON.stringify({ a: [1, 'x', null], b: undefined })",
                Value::from(r#"{"a":[1,"x",null]}"#),
            ),
            ("JSON.parse('{\"n\": 3}').n * 2", Value::Number(6.0)),
            (
                "let i = 0, s = 0;\n\
                 for (; i < 10; i++) { if (i % 2) continue; if (i > 6) break; s += i; } s",
                Value::Number(12.0),
            ),
            ("var n = 0; do { n++; } while (n < 3); n", Value::Number(3.0)),
            (
                "function Point(x) { this.x = x; } new Point(4).x",
                Value::Number(4.0),
            ),
            (
                "var make = function (n) { return function () { return n * 2; }; }; make(21)()",
                Value::Number(42.0),
            ),
            ("true ? 'yes' : 'no'", Value::from("yes")),
            ("0 || 'fallback'", Value::from("fallback")),
            ("-0", Value::Number(-0.0)),
        ];
        for (source, expected) in cases {
            assert_eq!(value(&mut controller, source), expected, "{source}");
        }
    }

    #[test]
    fn test_runtime_errors() {
        let mut controller = controller();
        assert_eq!(
            thrown(&mut controller, "missing"),
            "ReferenceError: missing is not defined"
        );
        assert_eq!(
            thrown(&mut controller, "const c = 1; c = 2"),
            "TypeError: Assignment to constant variable."
        );
        assert_eq!(
            thrown(&mut controller, "null.x"),
            "TypeError: Cannot read properties of null (reading 'x')"
        );
        assert_eq!(thrown(&mut controller, "(1)()"), "TypeError: expression is not a function");
    }

    #[test]
    fn test_finally_runs_for_throws() {
        let mut controller = controller();
        let source = "var order = [];\n\
                      try { try { throw 'a'; } finally { order.push('f'); } }\n\
                      catch (e) { order.push(e); }\n\
                      order.join()";
        assert_eq!(value(&mut controller, source), Value::from("f,a"));
    }

    #[test]
    fn test_console_delivers_log_events() {
        let (tx, rx) = std::sync::mpsc::channel();
        let base = crate::WorkerContext::new("about:blank").with_log_sender(tx);
        let (host, _port) = HostCapabilities::dedicated(base);
        let mut controller = ScriptController::new(host, None);

        value(&mut controller, "console.log('hello', 42, [1, 2]); console.error(new Error('bad'))");

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level, LogLevel::Log);
        assert_eq!(events[0].message, "hello 42 1,2");
        assert_eq!(events[1].level, LogLevel::Error);
        assert_eq!(events[1].message, "Error: bad");
    }

    #[test]
    fn test_close_sets_closing_flag() {
        let (host, _rx) = dedicated_host();
        let mut controller = ScriptController::new(host.clone(), None);
        value(&mut controller, "close()");
        assert!(host.base().is_closing());
    }

    #[tokio::test]
    async fn test_post_message_reaches_parent() {
        let (host, mut rx) = dedicated_host();
        let mut controller = ScriptController::new(host, None);

        value(&mut controller, "postMessage({ kind: 'ready', items: [1, 2] })");

        let message = rx.recv().await.unwrap();
        assert_eq!(message, json!({ "kind": "ready", "items": [1, 2] }));
    }

    #[test]
    fn test_post_message_rejects_functions() {
        let mut controller = controller();
        let source = "try { postMessage({ f: function () {} }); } catch (e) { e.name }";
        assert_eq!(value(&mut controller, source), Value::from("DataCloneError"));
    }

    #[tokio::test]
    async fn test_deliver_message_runs_onmessage() {
        let (host, mut rx) = dedicated_host();
        let mut controller = ScriptController::new(host, None);
        value(
            &mut controller,
            "onmessage = function (event) { postMessage({ echo: event.data.n + 1 }); };",
        );

        let outcome = controller.deliver_message(Bytes::from_static(br#"{"n": 41}"#)).unwrap();
        assert_eq!(outcome, EvaluationOutcome::Value(Value::Undefined));
        assert_eq!(rx.recv().await.unwrap(), json!({ "echo": 42 }));
    }

    #[test]
    fn test_undecodable_message_raises_data_clone_error() {
        let reporter = Arc::new(RecordingReporter::default());
        let (host, _rx) = dedicated_host();
        let mut controller = ScriptController::new(host, None).with_reporter(reporter.clone());
        value(&mut controller, "var calls = 0; onmessage = function () { calls++; };");

        let outcome = controller.deliver_message(Bytes::from_static(b"\xff not json")).unwrap();

        assert!(outcome.exception().is_some());
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.starts_with("DataCloneError"), "{}", reports[0].message);
        assert_eq!(value(&mut controller, "calls"), Value::Number(0.0));
    }

    #[test]
    fn test_kind_specific_operations() {
        let mut dedicated = controller();
        let (port, _rx) = MessagePort::channel();
        assert_eq!(
            dedicated.dispatch_connect(port),
            Err(UsageError::WrongWorkerKind {
                expected: WorkerKind::Shared,
                actual: WorkerKind::Dedicated,
            })
        );

        let mut shared = ScriptController::new(shared_host("hub"), None);
        assert_eq!(
            shared.deliver_message(Bytes::from_static(b"1")),
            Err(UsageError::WrongWorkerKind {
                expected: WorkerKind::Dedicated,
                actual: WorkerKind::Shared,
            })
        );
    }

    #[tokio::test]
    async fn test_shared_worker_connect() {
        let host = shared_host("hub");
        let mut controller = ScriptController::new(host.clone(), None);
        value(
            &mut controller,
            "var connections = 0;\n\
             onconnect = function (e) {\n\
                 connections++;\n\
                 e.ports[0].postMessage({ hello: name, n: connections });\n\
             };",
        );

        let (first, mut first_rx) = MessagePort::channel();
        let (second, mut second_rx) = MessagePort::channel();
        controller.dispatch_connect(first).unwrap();
        controller.dispatch_connect(second).unwrap();

        assert_eq!(first_rx.recv().await.unwrap(), json!({ "hello": "hub", "n": 1 }));
        assert_eq!(second_rx.recv().await.unwrap(), json!({ "hello": "hub", "n": 2 }));
        if let HostCapabilities::Shared(context) = &host {
            assert_eq!(context.connection_count(), 2);
        }
    }

    #[test]
    fn test_dispose_keeps_guard_usable() {
        let controller = controller();
        let guard = controller.execution_guard();
        controller.dispose();

        guard.forbid(ForbidMode::TerminateRunningScript);
        assert!(guard.is_forbidden());
    }
}
