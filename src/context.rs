//! Host capabilities exposed to scripts as globals
//!
//! A worker is either dedicated (one owner, one parent port) or shared (any
//! number of connected ports). Both layer their capabilities over the same
//! `WorkerContext` base, and the choice is fixed when the host is built.

use crate::log::LogSender;
use crate::message::{MessagePort, MessageReceiver};
use crate::{LogEvent, LogLevel};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Worker flavor of a global scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Dedicated,
    Shared,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Dedicated => write!(f, "dedicated"),
            WorkerKind::Shared => write!(f, "shared"),
        }
    }
}

/// Capabilities common to every worker kind
#[derive(Debug)]
pub struct WorkerContext {
    location: String,
    env: HashMap<String, String>,
    log_tx: Option<LogSender>,
    closing: AtomicBool,
    wrappers: AtomicUsize,
}

impl WorkerContext {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            env: HashMap::new(),
            log_tx: None,
            closing: AtomicBool::new(false),
            wrappers: AtomicUsize::new(0),
        }
    }

    /// Variables exposed to script as the `env` object
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Destination of `console.*` output; dropped silently when unset
    pub fn with_log_sender(mut self, log_tx: LogSender) -> Self {
        self.log_tx = Some(log_tx);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Whether the script called `close()`
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    /// Number of global scopes ever bound to this context
    pub fn wrapper_count(&self) -> usize {
        self.wrappers.load(Ordering::Relaxed)
    }

    pub(crate) fn log(&self, level: LogLevel, message: String) {
        if let Some(tx) = &self.log_tx {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(LogEvent { level, message });
        }
    }

    pub(crate) fn close(&self) {
        self.closing.store(true, Ordering::Relaxed);
    }

    pub(crate) fn attach_wrapper(&self) {
        self.wrappers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker owned by a single parent
#[derive(Debug)]
pub struct DedicatedWorkerContext {
    base: WorkerContext,
    parent: MessagePort,
}

impl DedicatedWorkerContext {
    /// Returns the context and the parent's end of its message channel
    pub fn new(base: WorkerContext) -> (Self, MessageReceiver) {
        let (parent, rx) = MessagePort::channel();
        (Self { base, parent }, rx)
    }

    pub fn base(&self) -> &WorkerContext {
        &self.base
    }

    pub(crate) fn post_message(&self, message: JsonValue) {
        if !self.parent.post(message) {
            tracing::debug!("parent port closed, message dropped");
        }
    }
}

/// Worker reachable from any number of connected ports
#[derive(Debug)]
pub struct SharedWorkerContext {
    base: WorkerContext,
    name: String,
    ports: Mutex<Vec<MessagePort>>,
}

impl SharedWorkerContext {
    pub fn new(base: WorkerContext, name: impl Into<String>) -> Self {
        Self {
            base,
            name: name.into(),
            ports: Mutex::new(Vec::new()),
        }
    }

    pub fn base(&self) -> &WorkerContext {
        &self.base
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection_count(&self) -> usize {
        self.ports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Register a port, returning its index
    pub(crate) fn connect(&self, port: MessagePort) -> usize {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        ports.push(port);
        ports.len() - 1
    }

    pub(crate) fn post_to_port(&self, index: usize, message: JsonValue) {
        let ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        match ports.get(index) {
            Some(port) if port.post(message) => {}
            _ => tracing::debug!(index, "port closed, message dropped"),
        }
    }
}

/// Capability profile handed to a script environment at initialization
#[derive(Debug, Clone)]
pub enum HostCapabilities {
    Dedicated(Arc<DedicatedWorkerContext>),
    Shared(Arc<SharedWorkerContext>),
}

impl HostCapabilities {
    /// Dedicated host plus the receiver for the script's `postMessage`
    pub fn dedicated(base: WorkerContext) -> (Self, MessageReceiver) {
        let (context, rx) = DedicatedWorkerContext::new(base);
        (HostCapabilities::Dedicated(Arc::new(context)), rx)
    }

    pub fn shared(base: WorkerContext, name: impl Into<String>) -> Self {
        HostCapabilities::Shared(Arc::new(SharedWorkerContext::new(base, name)))
    }

    pub fn kind(&self) -> WorkerKind {
        match self {
            HostCapabilities::Dedicated(_) => WorkerKind::Dedicated,
            HostCapabilities::Shared(_) => WorkerKind::Shared,
        }
    }

    pub fn base(&self) -> &WorkerContext {
        match self {
            HostCapabilities::Dedicated(context) => context.base(),
            HostCapabilities::Shared(context) => context.base(),
        }
    }
}
