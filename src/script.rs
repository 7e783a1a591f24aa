/// Origin used when the caller does not supply one
pub const ANONYMOUS_ORIGIN: &str = "about:blank";

/// Source unit handed to the controller by a script-loading collaborator
///
/// Immutable once built; the controller only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub text: String,
    /// URL the source was loaded from, used in exception reports
    pub origin_url: String,
    /// Line number of the first line of `text` within its origin (1-based)
    pub start_line: u32,
}

impl SourceUnit {
    /// Create a source unit with an anonymous origin starting at line 1
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin_url: ANONYMOUS_ORIGIN.to_string(),
            start_line: 1,
        }
    }

    /// Create a source unit with provenance
    pub fn with_origin(
        text: impl Into<String>,
        origin_url: impl Into<String>,
        start_line: u32,
    ) -> Self {
        Self {
            text: text.into(),
            origin_url: origin_url.into(),
            start_line: start_line.max(1),
        }
    }

    /// Translate a 1-based line inside `text` to a line in the origin
    ///
    /// Saturates at `u32::MAX` for sources placed near the end of the range.
    pub fn absolute_line(&self, local_line: u32) -> u32 {
        self.start_line.saturating_add(local_line.saturating_sub(1))
    }
}

impl From<String> for SourceUnit {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SourceUnit {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
