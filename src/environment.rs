//! Script environment: arena, global scope and pending exception
//!
//! Owned by exactly one worker task. The global scope is built on first use
//! and keeps its identity until the environment is disposed. Disposal
//! consumes the environment, so there is no way to touch it afterwards.
//!
//! Unreachable objects are collected before a run starts. Object values a run
//! handed back to the host are only valid until the next run.

use crate::context::HostCapabilities;
use crate::error::UsageError;
use crate::global::GlobalScope;
use crate::heap::{ErrorKind, Heap, NativeFunction, ObjectKind};
use crate::interpreter::{Completion, Interpreter};
use crate::parser::parse;
use crate::report::PendingException;
use crate::watch::ArmedWatch;
use crate::{RuntimeLimits, SourceUnit, TerminationReason, Value};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    Initialized,
}

#[derive(Debug)]
pub struct ScriptEnvironment {
    heap: Heap,
    global: Option<GlobalScope>,
    pending: PendingException,
    max_call_depth: usize,
}

impl ScriptEnvironment {
    pub fn new(limits: &RuntimeLimits) -> Self {
        Self {
            heap: Heap::new(limits),
            global: None,
            pending: PendingException::default(),
            max_call_depth: limits.max_call_depth,
        }
    }

    pub fn state(&self) -> EnvironmentState {
        match self.global {
            Some(_) => EnvironmentState::Initialized,
            None => EnvironmentState::Uninitialized,
        }
    }

    /// Build the global scope on first call; later calls return the same one
    pub fn ensure_initialized(&mut self, host: &HostCapabilities) -> &GlobalScope {
        self.global
            .get_or_insert_with(|| GlobalScope::build(&mut self.heap, host))
    }

    pub fn global(&self) -> Option<&GlobalScope> {
        self.global.as_ref()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Park `value` to be thrown at the next safe point
    pub fn inject_exception(&self, value: Value) -> Result<(), UsageError> {
        if self.global.is_none() {
            return Err(UsageError::NotInitialized);
        }
        if !self.heap.owns(&value) {
            return Err(UsageError::ForeignValue);
        }
        self.pending.set(value);
        Ok(())
    }

    pub fn has_pending_exception(&self) -> bool {
        self.pending.is_set()
    }

    /// Build an error object for injection, outside the script's budget
    pub fn create_error(&mut self, kind: ErrorKind, message: &str) -> Result<Value, UsageError> {
        if self.global.is_none() {
            return Err(UsageError::NotInitialized);
        }
        Ok(self.heap.host_error_value(kind, message))
    }

    /// Render a value the way uncaught exceptions are reported
    pub fn describe(&self, value: &Value) -> String {
        if !self.heap.owns(value) {
            return "<foreign value>".to_string();
        }
        self.heap.display(value)
    }

    /// Parse and run `source` in the global scope
    pub(crate) fn run(
        &mut self,
        host: &HostCapabilities,
        source: &SourceUnit,
        watch: &ArmedWatch<'_>,
    ) -> Completion {
        let global = self
            .global
            .get_or_insert_with(|| GlobalScope::build(&mut self.heap, host));
        collect_garbage(&mut self.heap, global, &self.pending);

        let program = match parse(&source.text) {
            Ok(program) => program,
            Err(err) => {
                let line = source.absolute_line(err.line);
                return match self.heap.error_value(ErrorKind::SyntaxError, &err.message) {
                    Ok(value) => Completion::Throw { value, line },
                    Err(reason) => Completion::Terminated(reason),
                };
            }
        };

        let completion = Interpreter::new(
            &mut self.heap,
            global,
            &self.pending,
            watch,
            self.max_call_depth,
        )
        .run_program(&program);

        match completion {
            Completion::Throw { value, line } => Completion::Throw {
                value,
                line: source.absolute_line(line),
            },
            other => other,
        }
    }

    /// Fire `onmessage` with `{ data }`; `None` data means decoding failed
    pub(crate) fn dispatch_message(
        &mut self,
        host: &HostCapabilities,
        watch: &ArmedWatch<'_>,
        data: Option<&JsonValue>,
    ) -> Completion {
        self.dispatch(host, watch, "onmessage", |heap| {
            let data = match data {
                Some(json) => heap.from_json(json)?,
                None => Value::Null,
            };
            let event = heap.allocate(ObjectKind::Ordinary, vec![("data".into(), data)])?;
            Ok(Value::Object(event))
        })
    }

    /// Fire `onconnect` with `{ ports: [port], source: port }`
    pub(crate) fn dispatch_connect(
        &mut self,
        host: &HostCapabilities,
        watch: &ArmedWatch<'_>,
        port_index: usize,
    ) -> Completion {
        self.dispatch(host, watch, "onconnect", |heap| {
            let post = heap.allocate_host(
                ObjectKind::Native(NativeFunction::PortPostMessage(port_index)),
                Vec::new(),
            );
            let port = Value::Object(heap.allocate_host(
                ObjectKind::Ordinary,
                vec![("postMessage".into(), Value::Object(post))],
            ));
            let ports = heap.allocate(ObjectKind::Array(vec![port.clone()]), Vec::new())?;
            let event = heap.allocate(
                ObjectKind::Ordinary,
                vec![
                    ("ports".into(), Value::Object(ports)),
                    ("source".into(), port),
                ],
            )?;
            Ok(Value::Object(event))
        })
    }

    fn dispatch(
        &mut self,
        host: &HostCapabilities,
        watch: &ArmedWatch<'_>,
        handler: &str,
        build_event: impl FnOnce(&mut Heap) -> Result<Value, TerminationReason>,
    ) -> Completion {
        let global = self
            .global
            .get_or_insert_with(|| GlobalScope::build(&mut self.heap, host));
        collect_garbage(&mut self.heap, global, &self.pending);

        Interpreter::new(
            &mut self.heap,
            global,
            &self.pending,
            watch,
            self.max_call_depth,
        )
        .dispatch(handler, build_event)
    }

    /// Release the arena and the global scope
    pub fn dispose(self) {
        tracing::debug!(
            objects = self.heap.len(),
            initialized = self.global.is_some(),
            "script environment disposed"
        );
    }
}

/// Reclaim what earlier runs left unreachable from the global scope
fn collect_garbage(heap: &mut Heap, global: &GlobalScope, pending: &PendingException) {
    if !heap.wants_collection() {
        return;
    }
    let mut roots = vec![Value::Object(global.object())];
    roots.extend(pending.peek());
    let freed = heap.collect(&roots, std::slice::from_ref(global.lexical()));
    tracing::trace!(freed, live = heap.len(), "heap collected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkerContext;

    fn host() -> HostCapabilities {
        HostCapabilities::shared(WorkerContext::new("about:blank"), "test")
    }

    #[test]
    fn test_initialization_is_idempotent() {
        let host = host();
        let mut environment = ScriptEnvironment::new(&RuntimeLimits::default());
        assert_eq!(environment.state(), EnvironmentState::Uninitialized);

        let first = environment.ensure_initialized(&host).object();
        let second = environment.ensure_initialized(&host).object();

        assert_eq!(first, second);
        assert_eq!(environment.state(), EnvironmentState::Initialized);
        assert_eq!(host.base().wrapper_count(), 1);
    }

    #[test]
    fn test_inject_requires_initialization() {
        let mut environment = ScriptEnvironment::new(&RuntimeLimits::default());
        assert_eq!(
            environment.inject_exception(Value::from("boom")),
            Err(UsageError::NotInitialized)
        );
        assert_eq!(
            environment.create_error(ErrorKind::Error, "boom"),
            Err(UsageError::NotInitialized)
        );

        environment.ensure_initialized(&host());
        assert_eq!(environment.inject_exception(Value::from("boom")), Ok(()));
        assert!(environment.has_pending_exception());
    }

    #[test]
    fn test_foreign_values_are_rejected() {
        let host = host();
        let mut other = ScriptEnvironment::new(&RuntimeLimits::default());
        other.ensure_initialized(&host);
        let id = other.heap.allocate(ObjectKind::Ordinary, Vec::new()).unwrap();

        let mut environment = ScriptEnvironment::new(&RuntimeLimits::default());
        environment.ensure_initialized(&host);

        assert_eq!(
            environment.inject_exception(Value::Object(id)),
            Err(UsageError::ForeignValue)
        );
        assert_eq!(environment.describe(&Value::Object(id)), "<foreign value>");
        assert!(!environment.has_pending_exception());
    }
}
