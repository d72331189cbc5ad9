use std::fmt::{Debug, Formatter};

use crate::grammars::compiled::{CompiledGrammar, RegexId, RuleId};
use crate::grammars::regex::{CapturePositions, Regex};
use crate::tokenizer::anchors::AnchorActive;

/// What produced a match: the end/while pattern of the current frame or one of its children
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    End,
    Rule(RuleId),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub candidate: Candidate,
    pub start: usize,
    pub end: usize,
    pub capture_pos: CapturePositions,
}

/// The children of one rule, flattened in priority order.
///
/// Each regex is searched on its own rather than through a RegSet so that every candidate
/// gets its own backtracking budget: one catastrophic pattern only loses its own match.
pub struct PatternSet {
    rules: Vec<(RuleId, RegexId)>,
}

impl PatternSet {
    pub fn new(rules: Vec<(RuleId, RegexId)>) -> Self {
        Self { rules }
    }

    /// Finds the leftmost match at or after `pos`. On ties the earliest candidate wins,
    /// the end pattern counting as the first one unless `end_last` is set.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_at(
        &self,
        grammar: &CompiledGrammar,
        end: Option<&Regex>,
        end_last: bool,
        text: &str,
        pos: usize,
        anchors: AnchorActive,
        retry_limit: Option<u32>,
    ) -> Option<PatternSetMatch> {
        let children = self
            .rules
            .iter()
            .map(|(rule_id, regex_id)| (Candidate::Rule(*rule_id), grammar.regex(*regex_id)));
        let end = end.map(|re| (Candidate::End, re));

        let mut best: Option<PatternSetMatch> = None;
        let ordered: Box<dyn Iterator<Item = (Candidate, &Regex)>> = if end_last {
            Box::new(children.chain(end))
        } else {
            Box::new(end.into_iter().chain(children))
        };

        for (candidate, re) in ordered {
            let Some(capture_pos) = re.search(text, pos, anchors, retry_limit) else {
                continue;
            };
            let Some((start, end)) = capture_pos.first().copied().flatten() else {
                continue;
            };
            if best.as_ref().is_some_and(|b| b.start <= start) {
                continue;
            }
            best = Some(PatternSetMatch {
                candidate,
                start,
                end,
                capture_pos,
            });
            // Nothing can start earlier than where we are
            if start == pos {
                break;
            }
        }

        best
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.rules.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::compiled::ROOT_RULE_ID;
    use crate::grammars::raw::{GrammarFormat, RawGrammar};

    fn grammar(json: &str) -> CompiledGrammar {
        RawGrammar::from_str(json, GrammarFormat::Json)
            .unwrap()
            .compile()
            .unwrap()
    }

    fn root_set(grammar: &CompiledGrammar) -> PatternSet {
        PatternSet::new(grammar.collect_patterns(ROOT_RULE_ID))
    }

    #[test]
    fn leftmost_match_wins_over_priority() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": [{"match": "b"}, {"match": "a"}]}"#);
        let set = root_set(&g);
        let m = set
            .find_at(&g, None, false, "ab", 0, AnchorActive::None, None)
            .unwrap();
        assert_eq!((m.start, m.end), (0, 1));
        assert_eq!(m.candidate, Candidate::Rule(g.collect_patterns(ROOT_RULE_ID)[1].0));
    }

    #[test]
    fn ties_go_to_the_earlier_candidate() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": [{"match": "a"}, {"match": "ab"}]}"#);
        let set = root_set(&g);
        let m = set
            .find_at(&g, None, false, "ab", 0, AnchorActive::None, None)
            .unwrap();
        assert_eq!((m.start, m.end), (0, 1));
    }

    #[test]
    fn end_pattern_position_follows_flag() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": [{"match": "x+"}]}"#);
        let set = root_set(&g);
        let end = Regex::new("x".to_string());

        let first = set
            .find_at(&g, Some(&end), false, "xx", 0, AnchorActive::None, None)
            .unwrap();
        assert_eq!(first.candidate, Candidate::End);

        let last = set
            .find_at(&g, Some(&end), true, "xx", 0, AnchorActive::None, None)
            .unwrap();
        assert_ne!(last.candidate, Candidate::End);
        assert_eq!(last.end, 2);
    }

    #[test]
    fn no_candidates_means_no_match() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": []}"#);
        let set = root_set(&g);
        assert_eq!(format!("{set:?}"), "PatternSet(0 rules)");
        assert!(set
            .find_at(&g, None, false, "abc", 0, AnchorActive::None, None)
            .is_none());
    }
}
