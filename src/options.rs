use std::time::Duration;

/// Backtracking steps a single candidate search may take before it counts as no match
pub const DEFAULT_MATCH_RETRY_LIMIT: u32 = 1_000_000;

/// Scan iterations in a row that don't advance the position before we give up on a line
pub const DEFAULT_MAX_STALLED_ITERATIONS: usize = 64;

/// Knobs for the tokenizer.
///
/// The defaults never cut a line short on time but do keep a single runaway regex from
/// hanging the tokenizer.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct TokenizerOptions {
    pub(crate) match_retry_limit: Option<u32>,
    pub(crate) line_time_limit: Option<Duration>,
    pub(crate) max_stalled_iterations: usize,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            match_retry_limit: Some(DEFAULT_MATCH_RETRY_LIMIT),
            line_time_limit: None,
            max_stalled_iterations: DEFAULT_MAX_STALLED_ITERATIONS,
        }
    }
}

impl TokenizerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-candidate backtracking budget. `None` lets Oniguruma run until it's done.
    pub fn match_retry_limit(mut self, value: Option<u32>) -> Self {
        self.match_retry_limit = value;
        self
    }

    /// How long a single line can take. Once exceeded, the rest of the line is a single
    /// token with only the grammar scope.
    pub fn line_time_limit(mut self, value: Option<Duration>) -> Self {
        self.line_time_limit = value;
        self
    }

    /// How many non-advancing iterations are tolerated on one line.
    /// Clamped to at least 1.
    pub fn max_stalled_iterations(mut self, value: usize) -> Self {
        self.max_stalled_iterations = value.max(1);
        self
    }
}
