use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime resource limits configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Budget of the environment arena in slots (default: 1M, 0 = unlimited)
    /// Every script object, property and array element takes one slot; stored
    /// strings take one more per 64 bytes. Host objects created during
    /// initialization are not counted, and unreachable objects are reclaimed
    /// between evaluations.
    pub heap_max_objects: usize,
    /// Maximum length of a script string in bytes (default: 16 MiB, 0 = unlimited)
    /// Building a longer one throws a catchable RangeError.
    pub max_string_length: usize,
    /// Maximum nesting of script function calls (default: 128)
    /// Exceeding it throws a catchable RangeError.
    pub max_call_depth: usize,
    /// Maximum wall-clock time per evaluation in milliseconds (default: 30s, 0 = disabled)
    pub max_wall_clock_time_ms: u64,
}

impl RuntimeLimits {
    /// Wall-clock budget for one evaluation, if enabled
    pub fn wall_clock_budget(&self) -> Option<Duration> {
        match self.max_wall_clock_time_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            heap_max_objects: 1_000_000,
            max_string_length: 16 << 20,
            max_call_depth: 128,
            max_wall_clock_time_ms: 30_000, // 30s per evaluation (anti-hang)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let limits: RuntimeLimits =
            serde_json::from_str(r#"{ "max_wall_clock_time_ms": 250 }"#).unwrap();

        assert_eq!(limits.max_wall_clock_time_ms, 250);
        assert_eq!(limits.max_call_depth, 128);
        assert_eq!(limits.max_string_length, 16 << 20);
        assert_eq!(limits.wall_clock_budget(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_disables_timeout() {
        let limits = RuntimeLimits {
            max_wall_clock_time_ms: 0,
            ..Default::default()
        };
        assert_eq!(limits.wall_clock_budget(), None);
    }
}
