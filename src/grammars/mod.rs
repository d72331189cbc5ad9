mod compiled;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::*;
pub(crate) use pattern_set::{Candidate, PatternSet, PatternSetMatch};
pub use raw::{Captures, Flag, GrammarFormat, RawGrammar, RawRule};
pub use regex::{CapturePositions, Regex, resolve_backreferences};
