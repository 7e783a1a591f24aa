use serde::{Deserialize, Serialize};

/// Reason why a running evaluation was aborted at a safe point
///
/// Carried by `ScriptError::Terminated`. Unlike thrown values, these can not
/// be caught by script code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    // === Resource limits ===
    /// Evaluation exceeded its wall-clock budget
    WallClockTimeout,

    /// Evaluation exhausted the environment's object arena
    MemoryLimit,

    // === External signal ===
    /// Execution was forbidden with `ForbidMode::TerminateRunningScript`
    Terminated,
}

impl TerminationReason {
    /// Returns true if this represents a resource limit violation
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::WallClockTimeout | Self::MemoryLimit)
    }

    /// Returns true if the controller asked for the abort
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::WallClockTimeout => "Script exceeded wall-clock time limit",
            Self::MemoryLimit => "Script exceeded memory limit",
            Self::Terminated => "Script execution was terminated",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for TerminationReason {}
