use crate::context::WorkerKind;
use crate::{TerminationReason, Value};

/// Failure of an evaluation, returned inside `EvaluationOutcome::Exception`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Script threw and nothing caught it
    #[error("Uncaught {message}")]
    Thrown {
        value: Value,
        /// `value` rendered as a string
        message: String,
        /// Line of the throw in the source origin
        line: u32,
    },

    /// Aborted at a safe point; not a script failure
    #[error(transparent)]
    Terminated(#[from] TerminationReason),
}

impl ScriptError {
    pub fn is_termination(&self) -> bool {
        matches!(self, ScriptError::Terminated(_))
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self {
            ScriptError::Terminated(reason) => Some(*reason),
            ScriptError::Thrown { .. } => None,
        }
    }

    /// The thrown value, if script code threw one
    pub fn value(&self) -> Option<&Value> {
        match self {
            ScriptError::Thrown { value, .. } => Some(value),
            ScriptError::Terminated(_) => None,
        }
    }
}

/// Misuse of the controller API by the embedding code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("script environment is not initialized")]
    NotInitialized,

    #[error("operation requires a {expected} worker, but this one is {actual}")]
    WrongWorkerKind {
        expected: WorkerKind,
        actual: WorkerKind,
    },

    #[error("value belongs to another script environment")]
    ForeignValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let thrown = ScriptError::Thrown {
            value: Value::from("x"),
            message: "x".into(),
            line: 3,
        };
        assert_eq!(thrown.to_string(), "Uncaught x");
        assert_eq!(thrown.value(), Some(&Value::from("x")));

        let terminated = ScriptError::from(TerminationReason::WallClockTimeout);
        assert!(terminated.is_termination());
        assert_eq!(terminated.to_string(), "Script exceeded wall-clock time limit");

        let usage = UsageError::WrongWorkerKind {
            expected: WorkerKind::Shared,
            actual: WorkerKind::Dedicated,
        };
        assert_eq!(
            usage.to_string(),
            "operation requires a shared worker, but this one is dedicated"
        );
    }
}
