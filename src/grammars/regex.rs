use std::fmt;
use std::sync::OnceLock;

use onig::{MatchParam, Region, SearchOptions};

use crate::tokenizer::anchors::AnchorActive;

/// Capture spans of a successful search, absolute byte offsets in the searched text.
/// Index 0 is the whole match, `None` is a group that didn't participate.
pub type CapturePositions = Vec<Option<(usize, usize)>>;

/// A regex pattern compiled lazily, once per anchor variant
pub struct Regex {
    pattern: String,
    has_backrefs: bool,
    compiled: [OnceLock<Option<onig::Regex>>; AnchorActive::COUNT],
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        let has_backrefs = has_backreferences(&pattern);
        Self {
            pattern,
            has_backrefs,
            compiled: Default::default(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern refers to `\1`..`\9`. Only meaningful for end/while patterns
    /// where they point at the begin captures.
    pub fn has_backreferences(&self) -> bool {
        self.has_backrefs
    }

    /// Validate that this regex pattern compiles successfully.
    ///
    /// Backreferences are resolved against the begin captures at runtime so we check
    /// the pattern with them blanked out.
    pub fn validate(&self) -> Result<(), onig::Error> {
        if self.has_backrefs {
            let blanked = resolve_backreferences(&self.pattern, "", &[]);
            onig::Regex::new(&blanked).map(|_| ())
        } else {
            let re = onig::Regex::new(&self.pattern)?;
            // Prime the cache with the variant where every anchor is active
            let _ = self.compiled[AnchorActive::AG.index()].set(Some(re));
            Ok(())
        }
    }

    /// Returns the compiled regex for those anchors, or `None` if it doesn't compile.
    pub(crate) fn compiled(&self, anchors: AnchorActive) -> Option<&onig::Regex> {
        self.compiled[anchors.index()]
            .get_or_init(|| {
                let source = anchors.replace_anchors(&self.pattern);
                match onig::Regex::new(&source) {
                    Ok(re) => Some(re),
                    Err(_e) => {
                        #[cfg(feature = "debug")]
                        log::warn!("[regex] failed to compile {:?}: {_e}", self.pattern);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Finds the leftmost match at or after `from` in `text`.
    ///
    /// The whole text is given to the engine so lookbehinds can see before `from`.
    /// With a `retry_limit`, a search exceeding that many backtracking steps is treated
    /// as having no match.
    pub(crate) fn search(
        &self,
        text: &str,
        from: usize,
        anchors: AnchorActive,
        retry_limit: Option<u32>,
    ) -> Option<CapturePositions> {
        if from > text.len() {
            return None;
        }
        let re = self.compiled(anchors)?;
        let mut region = Region::new();

        let found = match retry_limit {
            Some(limit) => {
                let mut param = MatchParam::default();
                param.set_retry_limit_in_match(limit);
                match re.search_with_param(
                    text,
                    from,
                    text.len(),
                    SearchOptions::SEARCH_OPTION_NONE,
                    Some(&mut region),
                    param,
                ) {
                    Ok(found) => found,
                    Err(_e) => {
                        #[cfg(feature = "debug")]
                        log::debug!("[regex] giving up on {:?}: {_e}", self.pattern);
                        None
                    }
                }
            }
            None => re.search_with_options(
                text,
                from,
                text.len(),
                SearchOptions::SEARCH_OPTION_NONE,
                Some(&mut region),
            ),
        };

        found?;
        Some((0..region.len()).map(|i| region.pos(i)).collect())
    }
}

/// Looks for `\1`..`\9`, skipping escaped backslashes
fn has_backreferences(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('1'..='9') => return true,
                Some(_) | None => {}
            }
        }
    }
    false
}

/// Characters that have a meaning in a regex and need escaping when captured text is
/// spliced into a pattern.
const REGEX_SPECIAL_CHARS: &[char] = &[
    '-', '\\', '{', '}', '*', '+', '?', '|', '^', '$', '.', ',', '[', ']', '(', ')', '#',
];

fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if REGEX_SPECIAL_CHARS.contains(&c) || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Replaces `\1`..`\9` in an end/while pattern with the escaped text the begin pattern
/// captured in `line`. Groups that didn't participate are replaced by nothing.
pub fn resolve_backreferences(pattern: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d @ '1'..='9') => {
                let index = d as usize - '0' as usize;
                if let Some(Some((start, end))) = captures.get(index) {
                    out.push_str(&escape_regex(&line[*start..*end]));
                }
            }
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_leftmost_match_after_offset() {
        let re = Regex::new("b+".to_string());
        let caps = re.search("abbcbb", 3, AnchorActive::None, None).unwrap();
        assert_eq!(caps[0], Some((4, 6)));
    }

    #[test]
    fn lookbehind_sees_text_before_offset() {
        let re = Regex::new("(?<=a)b".to_string());
        let caps = re.search("ab", 1, AnchorActive::None, None).unwrap();
        assert_eq!(caps[0], Some((1, 2)));
    }

    #[test]
    fn g_anchor_only_matches_when_active() {
        let re = Regex::new("\\Gb".to_string());
        assert!(re.search("ab", 1, AnchorActive::G, None).is_some());
        assert!(re.search("ab", 1, AnchorActive::None, None).is_none());
    }

    #[test]
    fn reports_unmatched_groups() {
        let re = Regex::new("(a)|(b)".to_string());
        let caps = re.search("b", 0, AnchorActive::None, None).unwrap();
        assert_eq!(caps, vec![Some((0, 1)), None, Some((0, 1))]);
    }

    #[test]
    fn validate_rejects_malformed_patterns() {
        assert!(Regex::new("(unclosed".to_string()).validate().is_err());
        assert!(Regex::new("\\*/".to_string()).validate().is_ok());
        // \1 refers to a begin capture, not to a group of this pattern
        assert!(Regex::new("\\1".to_string()).validate().is_ok());
    }

    #[test]
    fn detects_backreferences() {
        assert!(Regex::new("\\1".to_string()).has_backreferences());
        assert!(!Regex::new("\\\\1".to_string()).has_backreferences());
        assert!(!Regex::new("\\d+".to_string()).has_backreferences());
    }

    #[test]
    fn resolves_backreferences_with_escaping() {
        let line = "<<\"*EOF\"";
        let captures = vec![Some((0, 8)), Some((3, 7))];
        assert_eq!(resolve_backreferences("^\\1$", line, &captures), "^\\*EOF$");
        assert_eq!(resolve_backreferences("\\2x", line, &captures), "x");
    }

    #[test]
    fn retry_limit_gives_up_on_catastrophic_backtracking() {
        let re = Regex::new("(a|aa)+$".to_string());
        let text = format!("{}b", "a".repeat(40));
        assert!(re.search(&text, 0, AnchorActive::None, Some(100)).is_none());
        assert!(re.search("aaa", 0, AnchorActive::None, Some(100)).is_some());
    }
}
