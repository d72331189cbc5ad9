//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>

use std::collections::HashMap;
use std::ops::Range;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::grammars::{
    Candidate, CompiledGrammar, PatternSet, PatternSetMatch, Regex, Rule, RuleId,
    resolve_backreferences,
};
use crate::options::TokenizerOptions;
use crate::scope::Scope;
use crate::tokenizer::anchors::AnchorActive;

pub(crate) mod anchors;
mod stack;

pub use stack::StateStack;

/// How many captures-with-patterns can be nested while re-tokenizing.
/// A capture that re-matches its own rule would otherwise recurse forever.
const MAX_RETOKENIZE_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.cs -> string.quoted.double.cs -> punctuation.definition.string.begin.cs).
    pub scopes: Vec<Scope>,
}

impl Token {
    /// The text of this token in the line it was produced from
    pub fn text<'a>(&self, line: &'a str) -> &'a str {
        line.get(self.span.clone()).unwrap_or_default()
    }
}

/// The result of tokenizing a single line
#[derive(Debug, Clone, PartialEq)]
pub struct LineTokens {
    pub tokens: Vec<Token>,
    /// State to give to the next line
    pub rule_stack: StateStack,
}

/// Small wrapper so we make we only produce valid tokens.
/// Called in the tokenizer a few times and easier to use a struct than pass
/// mutable vec and usize everywhere
#[derive(Debug, Clone, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
}

impl TokenAccumulator {
    fn starting_at(pos: usize) -> Self {
        Self {
            tokens: Vec::new(),
            last_end_pos: pos,
        }
    }

    fn produce(&mut self, end_pos: usize, scopes: &[Scope]) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::trace!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        );

        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.to_vec(),
        });

        self.last_end_pos = end_pos;
    }

    /// Similar to LineTokens.getResult in vscode-textmate except we don't push
    /// tokens for empty lines
    fn finalize(&mut self, line_len: usize) {
        // Pop the token for the added newline if there is one
        if let Some(tok) = self.tokens.last()
            && tok.span.start == line_len - 1
        {
            self.tokens.pop();
        }

        // If we have a token that includes the trailing newline,
        // decrement the end to not include it
        if let Some(t) = self.tokens.last_mut()
            && t.span.end == line_len
        {
            t.span.end -= 1;
        }
    }
}

/// Tokenizes lines with a single grammar.
///
/// Keeps the candidate lists of the rules it has seen as well as the end patterns
/// compiled after backreference substitution, so reuse it across the lines of a document.
#[derive(Debug)]
pub struct Tokenizer<'g> {
    grammar: &'g CompiledGrammar,
    options: TokenizerOptions,
    /// Runtime pattern cache by rule ID
    pattern_cache: HashMap<RuleId, PatternSet>,
    /// Used only for end/while patterns that have backreferences: they are essentially
    /// dynamic patterns so we might have multiple versions of the same regex in there
    end_regex_cache: HashMap<String, Regex>,
    /// When the line currently being tokenized has to be done
    deadline: Option<Instant>,
    retokenize_depth: usize,
}

fn dynamic_regex<'c>(cache: &'c mut HashMap<String, Regex>, pattern: &str) -> &'c Regex {
    if !cache.contains_key(pattern) {
        cache.insert(pattern.to_owned(), Regex::new(pattern.to_owned()));
    }
    &cache[pattern]
}

impl<'g> Tokenizer<'g> {
    pub fn new(grammar: &'g CompiledGrammar) -> Self {
        Self::with_options(grammar, TokenizerOptions::default())
    }

    pub fn with_options(grammar: &'g CompiledGrammar, options: TokenizerOptions) -> Self {
        Self {
            grammar,
            options,
            pattern_cache: HashMap::new(),
            end_regex_cache: HashMap::new(),
            deadline: None,
            retokenize_depth: 0,
        }
    }

    pub fn grammar(&self) -> &'g CompiledGrammar {
        self.grammar
    }

    /// Tokenizes one line, without its line terminator.
    ///
    /// `prior` is the `rule_stack` returned for the previous line, `None` for the first
    /// line of a document. The given stack is never modified so the same one can be
    /// reused to re-tokenize a line.
    pub fn tokenize_line(&mut self, line: &str, prior: Option<&StateStack>) -> LineTokens {
        let line = line.strip_suffix('\n').unwrap_or(line);
        // Always add a new line, some regex expect it
        let line = format!("{line}\n");
        let is_first_line = prior.is_none();
        let stack = prior
            .cloned()
            .unwrap_or_else(|| StateStack::new(self.grammar));

        self.deadline = self
            .options
            .line_time_limit
            .and_then(|limit| Instant::now().checked_add(limit));

        let (mut acc, stack) = self.tokenize_line_inner(stack, &line, 0, is_first_line, true);
        acc.finalize(line.len());

        let mut stack = self.close_single_line_rules(stack);
        stack.reset();

        LineTokens {
            tokens: acc.tokens,
            rule_stack: stack,
        }
    }

    /// Tokenizes a whole document, one `Vec<Token>` per line
    pub fn tokenize_string(&mut self, text: &str) -> Vec<Vec<Token>> {
        if text.is_empty() {
            return vec![];
        }

        let mut stack: Option<StateStack> = None;
        let mut lines_tokens = Vec::new();

        for line in text.split('\n') {
            let result = self.tokenize_line(line, stack.as_ref());
            lines_tokens.push(result.tokens);
            stack = Some(result.rule_stack);
        }

        lines_tokens
    }

    fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Begin/end rules marked with `appliesLineBreak: false` don't carry over to the next
    /// line: they are popped along with everything opened after them.
    fn close_single_line_rules(&self, mut stack: StateStack) -> StateStack {
        let frames = stack.frames();
        let outermost = frames.iter().position(|frame| {
            matches!(self.grammar.rule(frame.rule_id), Rule::BeginEnd(b) if !b.applies_line_break)
        });
        if let Some(index) = outermost {
            #[cfg(feature = "debug")]
            log::debug!("[close_single_line_rules] closing {} frame(s)", frames.len() - index);
            stack.truncate(index.saturating_sub(1));
        }
        stack
    }

    /// Finds the best candidate at `pos` among the children of the top frame and its end
    /// pattern.
    fn match_rule(
        &mut self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> Option<PatternSetMatch> {
        let grammar = self.grammar;
        let anchors = AnchorActive::new(is_first_line, anchor_position, pos);
        let rule_id = stack.top().rule_id;

        // Get end pattern from stack when it has backref filled, otherwise from the rule
        let (end, end_last) = match grammar.rule(rule_id) {
            Rule::BeginEnd(b) => {
                let re = match &stack.top().end_pattern {
                    Some(pattern) => dynamic_regex(&mut self.end_regex_cache, pattern),
                    None => grammar.regex(b.end),
                };
                (Some(re), b.apply_end_pattern_last)
            }
            _ => (None, false),
        };

        let pattern_set = self.pattern_cache.entry(rule_id).or_insert_with(|| {
            let patterns = grammar.collect_patterns(rule_id);
            #[cfg(feature = "debug")]
            log::debug!(
                "[match_rule] {} candidates for rule {:?} ({})",
                patterns.len(),
                rule_id,
                grammar.rule(rule_id).original_name().unwrap_or("No name")
            );
            PatternSet::new(patterns)
        });

        pattern_set.find_at(
            grammar,
            end,
            end_last,
            line,
            pos,
            anchors,
            self.options.match_retry_limit,
        )
    }

    /// Check if there are while conditions active and if they're still true.
    /// The first one failing pops its frame, and everything above it.
    fn check_while_conditions(
        &mut self,
        stack: StateStack,
        line: &str,
        pos: &mut usize,
        acc: &mut TokenAccumulator,
        is_first_line: bool,
    ) -> (StateStack, Option<usize>, bool) {
        let grammar = self.grammar;
        // Initialize anchor position: reset to 0 if previous rule captured EOL
        let mut anchor_position: Option<usize> = if stack.top().begin_rule_has_captured_eol {
            Some(0)
        } else {
            None
        };
        let mut is_first_line = is_first_line;

        let while_frames: Vec<_> = stack
            .frames()
            .into_iter()
            .filter(|frame| matches!(grammar.rule(frame.rule_id), Rule::BeginWhile(_)))
            .collect();

        if while_frames.is_empty() {
            return (stack, anchor_position, is_first_line);
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[check_while_conditions] going to check {} while rules",
            while_frames.len()
        );

        for frame in while_frames {
            let Rule::BeginWhile(rule) = grammar.rule(frame.rule_id) else {
                continue;
            };
            let anchors = AnchorActive::new(is_first_line, anchor_position, *pos);
            let re = match &frame.end_pattern {
                Some(pattern) => dynamic_regex(&mut self.end_regex_cache, pattern),
                None => grammar.regex(rule.while_),
            };

            let found = re
                .search(line, *pos, anchors, self.options.match_retry_limit)
                .and_then(|caps| match caps.first().copied().flatten() {
                    // Must match at current position
                    Some((start, end)) if start == *pos => Some((end, caps)),
                    _ => None,
                });

            let Some((end, captures)) = found else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] No while match found, popping: {:?}",
                    rule.name.as_ref().map(|n| n.source())
                );
                let mut popped = StateStack::from_frame(frame);
                popped.pop();
                return (popped, anchor_position, is_first_line);
            };

            acc.produce(*pos, &frame.content_scopes);
            if !rule.while_captures.is_empty() {
                let while_stack = StateStack::from_frame(frame.clone());
                self.resolve_captures(
                    &while_stack,
                    line,
                    &rule.while_captures,
                    &captures,
                    acc,
                    is_first_line,
                );
            }
            acc.produce(end, &frame.content_scopes);

            anchor_position = Some(end);
            if end > *pos {
                *pos = end;
                is_first_line = false;
            }
        }

        (stack, anchor_position, is_first_line)
    }

    fn resolve_captures(
        &mut self,
        stack: &StateStack,
        line: &str,
        rule_captures: &[Option<RuleId>],
        captures: &[Option<(usize, usize)>],
        accumulator: &mut TokenAccumulator,
        is_first_line: bool,
    ) {
        if rule_captures.is_empty() {
            return;
        }
        let grammar = self.grammar;
        // Captures inside a lookahead can lie past the match, they don't get scopes
        let max_end = captures.first().copied().flatten().map_or(0, |(_, end)| end);

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

        for (rule_id, capture) in rule_captures.iter().zip(captures) {
            let (Some(rule_id), Some((cap_start, cap_end))) = (rule_id, capture) else {
                continue;
            };
            let (cap_start, cap_end) = (*cap_start, *cap_end);
            if cap_start > max_end {
                break;
            }
            // Nothing captured
            if cap_start == cap_end {
                continue;
            }

            // pop captures while needed
            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                accumulator.produce(*end_pos, scopes);
                local_stack.pop();
            }

            match local_stack.last() {
                Some((scopes, _)) => accumulator.produce(cap_start, scopes),
                None => accumulator.produce(cap_start, &stack.top().content_scopes),
            }

            let rule = grammar.rule(*rule_id);

            // Captures with patterns are tokenized again, limited to the captured text
            if rule.has_patterns() && self.retokenize_depth < MAX_RETOKENIZE_DEPTH {
                let mut name_scopes = stack.top().content_scopes.clone();
                name_scopes.extend_from_slice(&rule.name_scopes(line, captures));

                let mut retokenization_stack = stack.clone();
                retokenization_stack.push(*rule_id, None, false, Some(cap_start), name_scopes);

                let mut content_scopes = retokenization_stack.top().name_scopes.clone();
                content_scopes.extend_from_slice(&rule.content_scopes(line, captures));
                retokenization_stack.set_content_scopes(content_scopes);

                #[cfg(feature = "debug")]
                log::debug!(
                    "[resolve_captures] Retokenizing capture at [{cap_start}..{cap_end}]: {:?}",
                    &line[cap_start..cap_end]
                );

                self.retokenize_depth += 1;
                let (retokenized_acc, _) = self.tokenize_line_inner(
                    retokenization_stack,
                    &line[..cap_end],
                    cap_start,
                    is_first_line && cap_start == 0,
                    false,
                );
                self.retokenize_depth -= 1;

                for token in retokenized_acc.tokens {
                    accumulator.produce(token.span.end, &token.scopes);
                }
                continue;
            }

            // For rules without patterns, we still need to apply their scopes
            let rule_scopes = rule.name_scopes(line, captures);
            if !rule_scopes.is_empty() {
                let mut base = match local_stack.last() {
                    Some((scopes, _)) => scopes.clone(),
                    None => stack.top().content_scopes.clone(),
                };
                base.extend_from_slice(&rule_scopes);
                local_stack.push((base, cap_end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            accumulator.produce(end_pos, &scopes);
        }
    }

    fn tokenize_line_inner(
        &mut self,
        stack: StateStack,
        line: &str,
        line_pos: usize,
        is_first_line: bool,
        check_while_conditions: bool,
    ) -> (TokenAccumulator, StateStack) {
        let grammar = self.grammar;
        let mut accumulator = TokenAccumulator::starting_at(line_pos);
        let mut pos = line_pos;
        let mut anchor_position = None;
        let mut is_first_line = is_first_line;
        let mut stack = stack;
        let mut stalled_iterations = 0;

        // 1. We check if the while pattern is still truthy
        if check_while_conditions {
            let while_res = self.check_while_conditions(
                stack,
                line,
                &mut pos,
                &mut accumulator,
                is_first_line,
            );
            stack = while_res.0;
            anchor_position = while_res.1;
            is_first_line = while_res.2;
        }

        // 2. We check for any matching patterns
        loop {
            if self.deadline_exceeded() {
                #[cfg(feature = "debug")]
                log::warn!("[tokenize_line] time limit exceeded at {pos}, giving up on the line");
                accumulator.produce(line.len(), &[grammar.scope]);
                break;
            }

            #[cfg(feature = "debug")]
            log::trace!("[tokenize_line] Scanning {pos}: |{:?}|", &line[pos..]);

            let Some(m) = self.match_rule(&stack, line, pos, is_first_line, anchor_position) else {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_line] no more matches");
                // No more matches - emit final token and stop
                accumulator.produce(line.len(), &stack.top().content_scopes);
                break;
            };

            // Track whether this match has advanced the position
            let has_advanced = m.end > pos;

            match m.candidate {
                // We matched the `end` for this rule, can only happen for BeginEnd rules
                Candidate::End => {
                    let end_captures: &[Option<RuleId>] = match grammar.rule(stack.top().rule_id) {
                        Rule::BeginEnd(b) => &b.end_captures,
                        _ => &[],
                    };

                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_line] End rule matched at {}..{}, popping '{}'",
                        m.start,
                        m.end,
                        grammar
                            .rule(stack.top().rule_id)
                            .original_name()
                            .unwrap_or_default()
                    );

                    accumulator.produce(m.start, &stack.top().content_scopes);
                    // Save for infinite loop protection
                    let popped_enter_position = stack.top().enter_position;
                    let popped_anchor_position = stack.top().anchor_position;

                    // contentName doesn't apply to the end delimiter
                    stack.set_content_scopes(stack.top().name_scopes.clone());
                    self.resolve_captures(
                        &stack,
                        line,
                        end_captures,
                        &m.capture_pos,
                        &mut accumulator,
                        is_first_line,
                    );
                    accumulator.produce(m.end, &stack.top().content_scopes);

                    // Pop to parent state and update anchor position
                    let Some(popped_frame) = stack.pop() else {
                        break;
                    };
                    anchor_position = popped_anchor_position;

                    // Grammar pushed & popped a rule without advancing - infinite loop protection
                    if !has_advanced && popped_enter_position == Some(pos) {
                        // See https://github.com/Microsoft/vscode-textmate/issues/12
                        // Like vscode-textmate, restore the popped frame to keep the rule active
                        stack.restore(popped_frame);
                        #[cfg(feature = "debug")]
                        log::debug!("[INFINITE LOOP PROTECTION] Restored rule to stack: {stack:?}");
                        accumulator.produce(line.len(), &stack.top().content_scopes);
                        break;
                    }
                }
                Candidate::Rule(rule_id) => {
                    let rule = grammar.rule(rule_id);
                    accumulator.produce(m.start, &stack.top().content_scopes);

                    let before_push = stack.clone();
                    let mut new_scopes = stack.top().content_scopes.clone();
                    new_scopes.extend_from_slice(&rule.name_scopes(line, &m.capture_pos));
                    stack.push(
                        rule_id,
                        anchor_position,
                        m.end == line.len(),
                        Some(pos),
                        new_scopes,
                    );

                    let begin = match rule {
                        Rule::BeginEnd(r) => Some((&r.begin_captures, r.end, r.end_has_backrefs)),
                        Rule::BeginWhile(r) => {
                            Some((&r.begin_captures, r.while_, r.while_has_backrefs))
                        }
                        _ => None,
                    };

                    if let Some((begin_captures, end_regex, end_has_backrefs)) = begin {
                        #[cfg(feature = "debug")]
                        log::debug!(
                            "[tokenize_line] Pushing begin rule={:?}",
                            rule.original_name().unwrap_or("No name")
                        );

                        self.resolve_captures(
                            &stack,
                            line,
                            begin_captures,
                            &m.capture_pos,
                            &mut accumulator,
                            is_first_line,
                        );
                        accumulator.produce(m.end, &stack.top().content_scopes);
                        anchor_position = Some(m.end);

                        let mut content_scopes = stack.top().name_scopes.clone();
                        content_scopes.extend_from_slice(&rule.content_scopes(line, &m.capture_pos));
                        stack.set_content_scopes(content_scopes);

                        if end_has_backrefs {
                            let resolved_end = resolve_backreferences(
                                grammar.regex(end_regex).pattern(),
                                line,
                                &m.capture_pos,
                            );
                            stack.set_end_pattern(resolved_end);
                        }

                        // Grammar pushed the same rule without advancing
                        if !has_advanced && before_push.has_same_rule_as(&stack) {
                            #[cfg(feature = "debug")]
                            log::debug!("[INFINITE LOOP PROTECTION] Same rule pushed twice at {pos}");
                            stack.pop();
                            accumulator.produce(line.len(), &stack.top().content_scopes);
                            break;
                        }
                    } else {
                        if let Rule::Match(r) = rule {
                            #[cfg(feature = "debug")]
                            log::debug!(
                                "[handle_match] Matched '{}'",
                                rule.original_name().unwrap_or_default()
                            );
                            self.resolve_captures(
                                &stack,
                                line,
                                &r.captures,
                                &m.capture_pos,
                                &mut accumulator,
                                is_first_line,
                            );
                            accumulator.produce(m.end, &stack.top().content_scopes);
                        }
                        // pop rule immediately since it is a MatchRule
                        stack.pop();

                        // Protection: grammar is not advancing, nor is it pushing/popping
                        if !has_advanced {
                            #[cfg(feature = "debug")]
                            log::warn!("Match rule didn't advance, safe_pop and stop");
                            stack.pop();
                            accumulator.produce(line.len(), &stack.top().content_scopes);
                            break;
                        }
                    }
                }
            }

            if has_advanced {
                pos = m.end;
                is_first_line = false;
                stalled_iterations = 0;
            } else {
                stalled_iterations += 1;
                if stalled_iterations >= self.options.max_stalled_iterations {
                    #[cfg(feature = "debug")]
                    log::warn!("[tokenize_line] stalled at {pos}, giving up on the line");
                    accumulator.produce(line.len(), &stack.top().content_scopes);
                    break;
                }
            }
        }

        (accumulator, stack)
    }
}

/// Tokenizes a single line with a throwaway [`Tokenizer`] and default options.
///
/// Prefer keeping a `Tokenizer` around when tokenizing several lines.
pub fn tokenize_line(
    grammar: &CompiledGrammar,
    line: &str,
    prior: Option<&StateStack>,
) -> LineTokens {
    Tokenizer::new(grammar).tokenize_line(line, prior)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::grammars::{GrammarFormat, RawGrammar};

    fn grammar(json: &str) -> CompiledGrammar {
        RawGrammar::from_str(json, GrammarFormat::Json)
            .unwrap()
            .compile()
            .unwrap()
    }

    fn csharp() -> CompiledGrammar {
        RawGrammar::load_from_file("src/fixtures/grammars/csharp.tmLanguage.yml")
            .unwrap()
            .compile()
            .unwrap()
    }

    /// (text, scopes) for each token of a line
    fn simplify<'a>(line: &'a str, tokens: &[Token]) -> Vec<(&'a str, Vec<&'static str>)> {
        tokens
            .iter()
            .map(|t| (t.text(line), t.scopes.iter().map(|s| s.as_str()).collect()))
            .collect()
    }

    fn format_tokens(input: &str, tokens: Vec<Vec<Token>>) -> String {
        let mut out = String::new();

        for (line_num, line_tokens) in tokens.iter().enumerate() {
            let line = input.split('\n').nth(line_num).unwrap_or("");
            for token in line_tokens {
                let scopes: Vec<_> = token.scopes.iter().map(|s| s.as_str()).collect();
                out.push_str(&format!(
                    "{:?} ({}..{}) {}\n",
                    token.text(line),
                    token.span.start,
                    token.span.end,
                    scopes.join(" ")
                ));
            }
            out.push('\n');
        }

        out
    }

    #[test]
    fn line_comment_end_to_end() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{"match": "//.*", "name": "comment.line"}]}"#,
        );
        let result = tokenize_line(&g, "// foo", None);
        assert_eq!(
            simplify("// foo", &result.tokens),
            vec![("// foo", vec!["source.test", "comment.line"])]
        );
        assert!(result.rule_stack.is_root());
    }

    #[test]
    fn earlier_rule_wins_ties() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"match": "a", "name": "first"},
                {"match": "ab", "name": "second"}
            ]}"#,
        );
        let result = tokenize_line(&g, "ab", None);
        assert_eq!(
            simplify("ab", &result.tokens),
            vec![
                ("a", vec!["source.test", "first"]),
                ("b", vec!["source.test"]),
            ]
        );
    }

    #[test]
    fn leftmost_match_wins_over_order() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"match": "b", "name": "bee"},
                {"match": "a", "name": "ay"}
            ]}"#,
        );
        let result = tokenize_line(&g, "ab", None);
        assert_eq!(
            simplify("ab", &result.tokens),
            vec![
                ("a", vec!["source.test", "ay"]),
                ("b", vec!["source.test", "bee"]),
            ]
        );
    }

    #[test]
    fn block_comment_carries_over_lines() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"begin": "/\\*", "end": "\\*/", "name": "comment.block"}
            ]}"#,
        );
        let mut tokenizer = Tokenizer::new(&g);

        let first = tokenizer.tokenize_line("/* foo", None);
        assert_eq!(first.rule_stack.depth(), 1);
        assert_eq!(
            simplify("/* foo", &first.tokens),
            vec![
                ("/*", vec!["source.test", "comment.block"]),
                (" foo", vec!["source.test", "comment.block"]),
            ]
        );

        let second = tokenizer.tokenize_line("bar */", Some(&first.rule_stack));
        assert_eq!(
            simplify("bar */", &second.tokens),
            vec![
                ("bar ", vec!["source.test", "comment.block"]),
                ("*/", vec!["source.test", "comment.block"]),
            ]
        );
        assert_eq!(second.rule_stack, StateStack::new(&g));
    }

    #[test]
    fn balanced_constructs_restore_the_stack() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"begin": "\\(", "end": "\\)", "name": "meta.group", "patterns": [{"include": "$self"}]}
            ]}"#,
        );
        let mut tokenizer = Tokenizer::new(&g);
        let open = tokenizer.tokenize_line("x (a (b", None);
        assert_eq!(open.rule_stack.depth(), 2);
        let close = tokenizer.tokenize_line("c) d)", Some(&open.rule_stack));
        assert_eq!(close.rule_stack, StateStack::new(&g));

        let same_line = tokenizer.tokenize_line("((a)) b", None);
        assert_eq!(same_line.rule_stack, StateStack::new(&g));
    }

    #[test]
    fn scopes_are_layered_root_first() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{
                "begin": "\"", "end": "\"",
                "name": "string.quoted",
                "contentName": "meta.content",
                "beginCaptures": {"0": {"name": "punctuation.begin"}},
                "endCaptures": {"0": {"name": "punctuation.end"}},
                "patterns": [{"match": "\\\\.", "name": "constant.escape"}]
            }]}"#,
        );
        let line = r#"x "a\tb" y"#;
        let result = tokenize_line(&g, line, None);
        assert_eq!(
            simplify(line, &result.tokens),
            vec![
                ("x ", vec!["source.test"]),
                ("\"", vec!["source.test", "string.quoted", "punctuation.begin"]),
                ("a", vec!["source.test", "string.quoted", "meta.content"]),
                (
                    "\\t",
                    vec!["source.test", "string.quoted", "meta.content", "constant.escape"]
                ),
                ("b", vec!["source.test", "string.quoted", "meta.content"]),
                ("\"", vec!["source.test", "string.quoted", "punctuation.end"]),
                (" y", vec!["source.test"]),
            ]
        );
    }

    #[test]
    fn captures_with_patterns_are_retokenized() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{
                "match": "(\\w+)\\((.*)\\)",
                "name": "meta.call",
                "captures": {
                    "1": {"name": "entity.name.function"},
                    "2": {"patterns": [{"match": "\\d+", "name": "constant.numeric"}]}
                }
            }]}"#,
        );
        let result = tokenize_line(&g, "f(1)", None);
        assert_eq!(
            simplify("f(1)", &result.tokens),
            vec![
                ("f", vec!["source.test", "meta.call", "entity.name.function"]),
                ("(", vec!["source.test", "meta.call"]),
                ("1", vec!["source.test", "meta.call", "constant.numeric"]),
                (")", vec!["source.test", "meta.call"]),
            ]
        );
    }

    #[test]
    fn end_pattern_backreferences_use_begin_captures() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{
                "begin": "<<(\\w+)", "end": "^\\1$", "name": "string.heredoc"
            }]}"#,
        );
        let mut tokenizer = Tokenizer::new(&g);
        let open = tokenizer.tokenize_line("<<EOF", None);
        assert_eq!(open.rule_stack.depth(), 1);

        let not_yet = tokenizer.tokenize_line("EOFX", Some(&open.rule_stack));
        assert_eq!(not_yet.rule_stack.depth(), 1);

        let closed = tokenizer.tokenize_line("EOF", Some(&not_yet.rule_stack));
        assert!(closed.rule_stack.is_root());
    }

    #[test]
    fn while_rules_continue_while_matching() {
        let g = grammar(
            r#"{"scopeName": "text.test", "patterns": [{
                "begin": "^>", "while": "^>", "name": "markup.quote"
            }]}"#,
        );
        let lines = tokenize_lines(&g, "> a\n> b\nc");
        assert_eq!(
            lines[1],
            vec![
                (">".to_string(), vec!["text.test", "markup.quote"]),
                (" b".to_string(), vec!["text.test", "markup.quote"]),
            ]
        );
        assert_eq!(lines[2], vec![("c".to_string(), vec!["text.test"])]);
    }

    fn tokenize_lines(g: &CompiledGrammar, text: &str) -> Vec<Vec<(String, Vec<&'static str>)>> {
        let tokens = Tokenizer::new(g).tokenize_string(text);
        text.split('\n')
            .zip(tokens)
            .map(|(line, tokens)| {
                simplify(line, &tokens)
                    .into_iter()
                    .map(|(text, scopes)| (text.to_string(), scopes))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn single_line_rules_close_at_end_of_line() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{
                "begin": "\"", "end": "\"", "name": "string.quoted", "appliesLineBreak": false
            }]}"#,
        );
        let lines = tokenize_lines(&g, "\"abc\nnext");
        assert_eq!(lines[0][1], ("abc".to_string(), vec!["source.test", "string.quoted"]));
        assert_eq!(lines[1], vec![("next".to_string(), vec!["source.test"])]);

        let result = tokenize_line(&g, "\"abc", None);
        assert!(result.rule_stack.is_root());
    }

    #[test]
    fn a_anchor_only_matches_on_first_line() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{"match": "\\A#!.*", "name": "comment.shebang"}]}"#,
        );
        let lines = tokenize_lines(&g, "#!/bin/sh\n#!/bin/sh");
        assert_eq!(lines[0][0].1, vec!["source.test", "comment.shebang"]);
        assert_eq!(lines[1][0].1, vec!["source.test"]);
    }

    #[test]
    fn retry_budget_falls_through_to_next_candidate() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"match": "(?:a|aa)+$|a", "name": "slow"},
                {"match": "a+", "name": "fast"}
            ]}"#,
        );
        let options = TokenizerOptions::new().match_retry_limit(Some(100));
        let mut tokenizer = Tokenizer::with_options(&g, options);
        let line = format!("{}b", "a".repeat(40));
        let result = tokenizer.tokenize_line(&line, None);
        assert_eq!(result.tokens[0].span, 0..40);
        assert_eq!(result.tokens[0].scopes, vec![Scope::new("source.test"), Scope::new("fast")]);
    }

    #[test]
    fn line_time_limit_emits_rest_with_root_scope() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [{"match": "//.*", "name": "comment.line"}]}"#,
        );
        let options = TokenizerOptions::new().line_time_limit(Some(Duration::ZERO));
        let mut tokenizer = Tokenizer::with_options(&g, options);
        let result = tokenizer.tokenize_line("// foo", None);
        assert_eq!(
            simplify("// foo", &result.tokens),
            vec![("// foo", vec!["source.test"])]
        );
    }

    #[test]
    fn lookahead_captures_past_the_match_are_ignored() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"match": "a(?=.(c))", "name": "m", "captures": {"1": {"name": "cap"}}},
                {"match": "b", "name": "kw.b"}
            ]}"#,
        );
        let result = tokenize_line(&g, "abc", None);
        assert_eq!(
            simplify("abc", &result.tokens),
            vec![
                ("a", vec!["source.test", "m"]),
                ("b", vec!["source.test", "kw.b"]),
                ("c", vec!["source.test"]),
            ]
        );
    }

    #[test]
    fn non_advancing_rules_do_not_hang() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"begin": "(?=x)", "end": "(?=x)", "name": "meta.lookahead"},
                {"match": "", "name": "empty"}
            ]}"#,
        );
        let result = tokenize_line(&g, "xyz", None);
        let covered: usize = result.tokens.iter().map(|t| t.span.len()).sum();
        assert_eq!(covered, 3);
    }

    #[test]
    fn empty_lines_have_no_tokens() {
        let g = grammar(r#"{"scopeName": "source.test", "patterns": [{"match": "a"}]}"#);
        let result = tokenize_line(&g, "", None);
        assert!(result.tokens.is_empty());
    }

    #[test]
    fn tokens_cover_fixture_lines_without_gaps() {
        let g = csharp();
        let sample = fs::read_to_string("src/fixtures/samples/sample.cs").unwrap();
        let tokens = Tokenizer::new(&g).tokenize_string(&sample);

        for (line, line_tokens) in sample.split('\n').zip(&tokens) {
            let mut expected_start = 0;
            for token in line_tokens {
                assert_eq!(token.span.start, expected_start, "gap in {line:?}");
                assert_eq!(token.scopes[0], "source.cs");
                expected_start = token.span.end;
            }
            if !line.is_empty() {
                assert_eq!(expected_start, line.len(), "line not covered: {line:?}");
            }
        }
    }

    #[test]
    fn retokenizing_a_line_with_its_prior_stack_is_idempotent() {
        let g = csharp();
        let sample = fs::read_to_string("src/fixtures/samples/sample.cs").unwrap();
        let mut sequential = Tokenizer::new(&g);

        let mut stack: Option<StateStack> = None;
        for line in sample.split('\n') {
            let result = sequential.tokenize_line(line, stack.as_ref());
            let isolated = Tokenizer::new(&g).tokenize_line(line, stack.as_ref());
            assert_eq!(result, isolated, "different result for {line:?}");
            stack = Some(result.rule_stack);
        }
        assert!(stack.is_some_and(|s| s.is_root()));
    }

    #[test]
    fn fixture_grammar_scopes() {
        let g = csharp();
        let input = "var s = $\"{a}\"; // done\n/* multi\n line */ int x = 0x1F;";
        let tokens = Tokenizer::new(&g).tokenize_string(input);
        let formatted = format_tokens(input, tokens);

        insta::assert_snapshot!(formatted.trim_end(), @r#"
        "var" (0..3) source.cs keyword.other.var.cs
        " " (3..4) source.cs
        "s" (4..5) source.cs variable.other.cs
        " " (5..6) source.cs
        "=" (6..7) source.cs keyword.operator.cs
        " " (7..8) source.cs
        "$\"" (8..10) source.cs string.quoted.double.interpolated.cs punctuation.definition.string.begin.cs
        "{" (10..11) source.cs string.quoted.double.interpolated.cs meta.interpolation.cs punctuation.definition.interpolation.begin.cs
        "a" (11..12) source.cs string.quoted.double.interpolated.cs meta.interpolation.cs variable.other.cs
        "}" (12..13) source.cs string.quoted.double.interpolated.cs meta.interpolation.cs punctuation.definition.interpolation.end.cs
        "\"" (13..14) source.cs string.quoted.double.interpolated.cs punctuation.definition.string.end.cs
        ";" (14..15) source.cs punctuation.terminator.statement.cs
        " " (15..16) source.cs
        "// done" (16..23) source.cs comment.line.double-slash.cs

        "/*" (0..2) source.cs comment.block.cs punctuation.definition.comment.cs
        " multi" (2..8) source.cs comment.block.cs

        " line " (0..6) source.cs comment.block.cs
        "*/" (6..8) source.cs comment.block.cs punctuation.definition.comment.cs
        " " (8..9) source.cs
        "int" (9..12) source.cs storage.type.cs
        " " (12..13) source.cs
        "x" (13..14) source.cs variable.other.cs
        " " (14..15) source.cs
        "=" (15..16) source.cs keyword.operator.cs
        " " (16..17) source.cs
        "0x1F" (17..21) source.cs constant.numeric.hex.cs
        ";" (21..22) source.cs punctuation.terminator.statement.cs
        "#);
    }

    #[test]
    fn shared_stacks_are_not_modified() {
        let g = grammar(
            r#"{"scopeName": "source.test", "patterns": [
                {"begin": "\\(", "end": "\\)", "name": "meta.group"}
            ]}"#,
        );
        let open = tokenize_line(&g, "(", None);
        let snapshot = open.rule_stack.clone();
        let _ = tokenize_line(&g, ")", Some(&open.rule_stack));
        let _ = tokenize_line(&g, "still open", Some(&open.rule_stack));
        assert_eq!(open.rule_stack, snapshot);
        assert_eq!(open.rule_stack.depth(), 1);
    }
}
