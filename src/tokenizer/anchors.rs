use std::borrow::Cow;
use std::fmt;

/// Used in place of an inactive anchor: a noncharacter that never shows up in real text
const NEVER_MATCHES: &str = "\u{FFFF}";

/// Which of the `\A` and `\G` anchors are live for a given search.
/// We don't want to enable them everywhere, it's context dependent:
/// `\A` only holds on the first line of a document and `\G` only at the position
/// where the last begin/while match ended.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub const COUNT: usize = 4;

    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// Slot of this variant in per-regex caches
    pub fn index(self) -> usize {
        match self {
            AnchorActive::AG => 0,
            AnchorActive::A => 1,
            AnchorActive::G => 2,
            AnchorActive::None => 3,
        }
    }

    fn disables_a(self) -> bool {
        matches!(self, AnchorActive::G | AnchorActive::None)
    }

    fn disables_g(self) -> bool {
        matches!(self, AnchorActive::A | AnchorActive::None)
    }

    /// Replaces the inactive anchors of `pat` with something that will not match.
    /// Escaped backslashes are skipped so `\\G` (a literal backslash then `G`) is kept.
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        if *self == AnchorActive::AG || !(pat.contains("\\A") || pat.contains("\\G")) {
            return Cow::Borrowed(pat);
        }

        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('A') if self.disables_a() => out.push_str(NEVER_MATCHES),
                Some('G') if self.disables_g() => out.push_str(NEVER_MATCHES),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        }
        Cow::Owned(out)
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
