//! Script execution controller for OpenWorkers background workers
//!
//! A `ScriptController` owns one isolated script environment on its worker
//! thread and evaluates source units in it. Any other thread may hold the
//! controller's `ExecutionGuard` and forbid further execution at any time,
//! optionally terminating the running script at its next safe point.

mod ast;
mod context;
mod environment;
mod error;
mod global;
mod guard;
mod heap;
mod interpreter;
mod lexer;
mod limits;
mod log;
mod message;
mod parser;
mod report;
mod script;
mod termination;
mod value;
mod watch;
mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{
    DedicatedWorkerContext, HostCapabilities, SharedWorkerContext, WorkerContext, WorkerKind,
};
pub use environment::{EnvironmentState, ScriptEnvironment};
pub use error::{ScriptError, UsageError};
pub use global::GlobalScope;
pub use guard::{ExecutionGuard, ForbidMode, Terminator};
pub use heap::{ErrorKind, Heap, ObjectId};
pub use limits::RuntimeLimits;
pub use log::{LogEvent, LogLevel, LogSender};
pub use message::{MessagePort, MessageReceiver};
pub use parser::ParseError;
pub use report::{DefaultReporter, ErrorReporter, ExceptionReport, ReporterHandle};
pub use script::{ANONYMOUS_ORIGIN, SourceUnit};
pub use termination::TerminationReason;
pub use value::{Value, format_number};
pub use worker::{ErrorPolicy, EvaluationOutcome, ScriptController};
