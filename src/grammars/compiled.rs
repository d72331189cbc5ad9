use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::grammars::raw::{Captures, Flag, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::scope::{Scope, parse_scope_names};

/// The rule holding the grammar top-level patterns and repository
pub const ROOT_RULE_ID: RuleId = RuleId(0);

/// How many repositories can be nested in one another
const MAX_REPOSITORY_DEPTH: usize = 8;

/// Highest capture group a `captures` key can refer to. Captures are stored densely by
/// index so this also bounds the memory a single rule can ask for.
const MAX_CAPTURE_INDEX: usize = 1000;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u32);

impl RegexId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RepositoryId(u32);

/// Name -> rule for one `repository` block
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Repository(HashMap<String, RuleId>);

impl Repository {
    /// Look up a rule by name in this repository
    pub fn get(&self, name: &str) -> Option<RuleId> {
        self.0.get(name).copied()
    }
}

/// The repositories visible from a rule, outermost first.
/// Any rule can declare its own `repository`, shadowing entries of the enclosing ones.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct RepositoryStack {
    stack: [Option<RepositoryId>; MAX_REPOSITORY_DEPTH],
    len: u8,
}

impl RepositoryStack {
    fn push(mut self, id: RepositoryId) -> Result<Self, CompileError> {
        let slot = self
            .stack
            .get_mut(self.len as usize)
            .ok_or(CompileError::RepositoryTooDeep)?;
        *slot = Some(id);
        self.len += 1;
        Ok(self)
    }

    /// Innermost repository first, which is the lookup order for `#name`
    pub fn innermost_first(&self) -> impl Iterator<Item = RepositoryId> + '_ {
        self.stack[..self.len as usize].iter().rev().flatten().copied()
    }
}

/// What an `include` can point to.
///
/// Allowed values:
///  * `$self` or the grammar's own scope name => root patterns
///  * `$base` => root patterns of the grammar being tokenized, which is always us
///  * `#name` => nearest repository entry called `name`
///  * `source.cs#name` => top-level repository entry of our own grammar
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reference {
    Self_,
    Base,
    Local(String),
    TopLevel(String),
}

impl Reference {
    fn parse(value: &str, own_scope: &str) -> Result<Self, CompileError> {
        match value {
            "$self" => Ok(Self::Self_),
            "$base" => Ok(Self::Base),
            s if s.starts_with('#') => Ok(Self::Local(s[1..].to_string())),
            s if s == own_scope => Ok(Self::Self_),
            s => match s.split_once('#') {
                Some((scope, rule)) if scope == own_scope => Ok(Self::TopLevel(rule.to_string())),
                _ => Err(CompileError::ExternalInclude {
                    include: value.to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Self_ => f.write_str("$self"),
            Reference::Base => f.write_str("$base"),
            Reference::Local(name) => write!(f, "#{name}"),
            Reference::TopLevel(name) => write!(f, "$self#{name}"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RuleIdOrReference {
    RuleId(RuleId),
    Reference(Reference),
}

/// A `name` or `contentName`: one or more scopes, possibly built from captured text
/// with `$1` or `${1:/downcase}`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScopeName {
    source: String,
    scopes: Vec<Scope>,
    has_placeholders: bool,
}

impl ScopeName {
    pub fn new(source: &str) -> Self {
        let bytes = source.as_bytes();
        let has_placeholders = bytes.windows(2).any(|w| {
            w[0] == b'$' && (w[1].is_ascii_digit() || w[1] == b'{')
        });
        Self {
            source: source.to_string(),
            scopes: parse_scope_names(source),
            has_placeholders,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The scopes for a match. `captures` are spans of `line`.
    pub fn resolve(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Cow<'_, [Scope]> {
        if !self.has_placeholders {
            return Cow::Borrowed(&self.scopes);
        }
        let replaced = substitute_captures(&self.source, line, captures);
        Cow::Owned(parse_scope_names(&replaced))
    }
}

/// Text of a capture as used in a scope name: leading dots are dropped
fn capture_text<'a>(line: &'a str, captures: &[Option<(usize, usize)>], index: usize) -> Option<&'a str> {
    let (start, end) = (*captures.get(index)?)?;
    Some(line.get(start..end)?.trim_start_matches('.'))
}

fn substitute_captures(source: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let after = &rest[dollar + 1..];

        // $N
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            let placeholder = &rest[dollar..dollar + 1 + digits];
            let index: usize = after[..digits].parse().unwrap_or(usize::MAX);
            match capture_text(line, captures, index) {
                Some(text) => out.push_str(text),
                None => out.push_str(placeholder),
            }
            rest = &after[digits..];
            continue;
        }

        // ${N:/downcase} and ${N:/upcase}
        if let Some(inner) = after.strip_prefix('{')
            && let Some(close) = inner.find('}')
            && let Some((num, command)) = inner[..close].split_once(":/")
            && let Ok(index) = num.parse::<usize>()
            && matches!(command, "downcase" | "upcase")
        {
            let placeholder = &rest[dollar..dollar + 2 + close + 1];
            match capture_text(line, captures, index) {
                Some(text) if command == "downcase" => out.push_str(&text.to_lowercase()),
                Some(text) => out.push_str(&text.to_uppercase()),
                None => out.push_str(placeholder),
            }
            rest = &inner[close + 1..];
            continue;
        }

        out.push('$');
        rest = after;
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    /// None for scope-only rules, ie captures that only assign a scope
    pub regex_id: Option<RegexId>,
    pub captures: Vec<Option<RuleId>>,
    pub repository_stack: RepositoryStack,
}

/// A plain list of patterns with no regex of its own. Also used for captures
/// that re-tokenize their text with nested patterns.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeOnly {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub patterns: Vec<RuleIdOrReference>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginEnd {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    /// Whether an unterminated span carries over to the next line
    pub applies_line_break: bool,
    pub patterns: Vec<RuleIdOrReference>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginWhile {
    pub id: RuleId,
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexId,
    pub while_has_backrefs: bool,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleIdOrReference>,
    pub repository_stack: RepositoryStack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Match(Match),
    IncludeOnly(IncludeOnly),
    BeginEnd(BeginEnd),
    BeginWhile(BeginWhile),
    Noop,
}

impl Rule {
    fn name(&self) -> Option<&ScopeName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::IncludeOnly(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Noop => None,
        }
    }

    fn content_name(&self) -> Option<&ScopeName> {
        match self {
            Rule::IncludeOnly(r) => r.content_name.as_ref(),
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            Rule::Match(_) | Rule::Noop => None,
        }
    }

    /// The `name` as written in the grammar, for debugging
    pub fn original_name(&self) -> Option<&str> {
        self.name().map(ScopeName::source)
    }

    pub fn name_scopes(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Cow<'_, [Scope]> {
        match self.name() {
            Some(name) => name.resolve(line, captures),
            None => Cow::Borrowed(&[]),
        }
    }

    pub fn content_scopes(
        &self,
        line: &str,
        captures: &[Option<(usize, usize)>],
    ) -> Cow<'_, [Scope]> {
        match self.content_name() {
            Some(name) => name.resolve(line, captures),
            None => Cow::Borrowed(&[]),
        }
    }

    pub fn patterns(&self) -> &[RuleIdOrReference] {
        match self {
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }

    /// Only include-only rules used as captures get re-tokenized
    pub fn has_patterns(&self) -> bool {
        matches!(self, Rule::IncludeOnly(r) if !r.patterns.is_empty())
    }

    pub fn repository_stack(&self) -> RepositoryStack {
        match self {
            Rule::Match(r) => r.repository_stack,
            Rule::IncludeOnly(r) => r.repository_stack,
            Rule::BeginEnd(r) => r.repository_stack,
            Rule::BeginWhile(r) => r.repository_stack,
            Rule::Noop => RepositoryStack::default(),
        }
    }
}

/// A validated grammar: an arena of rules and regexes where includes are kept as
/// references and looked up by name when the rules holding them become active.
#[derive(Debug)]
pub struct CompiledGrammar {
    pub name: Option<String>,
    pub scope_name: String,
    /// Outermost scope of every token
    pub scope: Scope,
    pub file_types: Vec<String>,
    pub regexes: Vec<Regex>,
    pub rules: Vec<Rule>,
    pub repositories: Vec<Repository>,
    root_repository: Option<RepositoryId>,
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: &RawGrammar) -> Result<Self, CompileError> {
        let scope_name = raw.scope_name.trim();
        if scope_name.is_empty() {
            return Err(CompileError::MissingScopeName);
        }

        let mut grammar = Self {
            name: raw.name.clone(),
            scope_name: scope_name.to_string(),
            scope: Scope::new(scope_name),
            file_types: raw.file_types.clone(),
            regexes: Vec::new(),
            rules: Vec::new(),
            repositories: Vec::new(),
            root_repository: None,
        };

        grammar.compile_root(&raw.patterns, &raw.repository)?;
        grammar.validate()?;

        Ok(grammar)
    }

    #[inline]
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.as_index()]
    }

    #[inline]
    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.as_index()]
    }

    /// Finds a top-level repository entry by name
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.root_repository
            .and_then(|repo| self.repositories[repo.0 as usize].get(name))
    }

    fn compile_root(
        &mut self,
        patterns: &[RawRule],
        repository: &BTreeMap<String, RawRule>,
    ) -> Result<(), CompileError> {
        // reserve rule 0
        self.rules.push(Rule::Noop);

        let mut repository_stack = RepositoryStack::default();
        if !repository.is_empty() {
            let (repo_id, stack) = self.compile_repository(repository, repository_stack)?;
            self.root_repository = Some(repo_id);
            repository_stack = stack;
        }

        let patterns = self.compile_patterns(patterns, repository_stack)?;
        self.rules[ROOT_RULE_ID.as_index()] = Rule::IncludeOnly(IncludeOnly {
            id: ROOT_RULE_ID,
            name: None,
            content_name: None,
            patterns,
            repository_stack,
        });
        Ok(())
    }

    fn compile_rule(
        &mut self,
        raw_rule: &RawRule,
        repository_stack: RepositoryStack,
    ) -> Result<RuleId, CompileError> {
        let id = RuleId(self.rules.len() as u32);

        // push a no-op to reserve its spot
        self.rules.push(Rule::Noop);

        let repository_stack = if raw_rule.repository.is_empty() {
            repository_stack
        } else {
            self.compile_repository(&raw_rule.repository, repository_stack)?
                .1
        };

        let name = raw_rule.name.as_deref().map(ScopeName::new);
        let content_name = raw_rule.content_name.as_deref().map(ScopeName::new);

        // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
        let rule = if let Some(pat) = &raw_rule.match_ {
            Rule::Match(Match {
                id,
                name,
                regex_id: Some(self.compile_regex(pat)),
                captures: self.compile_captures(&raw_rule.captures, repository_stack)?,
                repository_stack,
            })
        } else if let Some(begin_pat) = &raw_rule.begin {
            // specific captures win over the shared `captures`
            let begin_captures = if raw_rule.begin_captures.is_empty() {
                &raw_rule.captures
            } else {
                &raw_rule.begin_captures
            };

            if let Some(while_pat) = &raw_rule.while_ {
                let while_captures = if raw_rule.while_captures.is_empty() {
                    &raw_rule.captures
                } else {
                    &raw_rule.while_captures
                };
                let while_ = self.compile_regex(while_pat);
                Rule::BeginWhile(BeginWhile {
                    id,
                    name,
                    content_name,
                    begin: self.compile_regex(begin_pat),
                    begin_captures: self.compile_captures(begin_captures, repository_stack)?,
                    while_,
                    while_has_backrefs: self.regex(while_).has_backreferences(),
                    while_captures: self.compile_captures(while_captures, repository_stack)?,
                    patterns: self.compile_patterns(&raw_rule.patterns, repository_stack)?,
                    repository_stack,
                })
            } else if let Some(end_pat) = &raw_rule.end {
                let end_captures = if raw_rule.end_captures.is_empty() {
                    &raw_rule.captures
                } else {
                    &raw_rule.end_captures
                };
                let end = self.compile_regex(end_pat);
                Rule::BeginEnd(BeginEnd {
                    id,
                    name,
                    content_name,
                    begin: self.compile_regex(begin_pat),
                    begin_captures: self.compile_captures(begin_captures, repository_stack)?,
                    end,
                    end_has_backrefs: self.regex(end).has_backreferences(),
                    end_captures: self.compile_captures(end_captures, repository_stack)?,
                    apply_end_pattern_last: raw_rule.apply_end_pattern_last.is_some_and(Flag::is_set),
                    applies_line_break: raw_rule.applies_line_break.unwrap_or(true),
                    patterns: self.compile_patterns(&raw_rule.patterns, repository_stack)?,
                    repository_stack,
                })
            } else {
                // a rule that has begin without while/end is just a match, probably a typo
                Rule::Match(Match {
                    id,
                    name,
                    regex_id: Some(self.compile_regex(begin_pat)),
                    captures: self.compile_captures(begin_captures, repository_stack)?,
                    repository_stack,
                })
            }
        } else if name.is_some() && raw_rule.patterns.is_empty() && raw_rule.include.is_none() {
            // A capture that only assigns a scope
            Rule::Match(Match {
                id,
                name,
                regex_id: None,
                captures: Vec::new(),
                repository_stack,
            })
        } else {
            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L404
            let patterns = match (&raw_rule.include, raw_rule.patterns.is_empty()) {
                (Some(include), true) => vec![RuleIdOrReference::Reference(Reference::parse(
                    include,
                    &self.scope_name,
                )?)],
                _ => self.compile_patterns(&raw_rule.patterns, repository_stack)?,
            };

            if patterns.is_empty() {
                Rule::Noop
            } else {
                Rule::IncludeOnly(IncludeOnly {
                    id,
                    name,
                    content_name,
                    patterns,
                    repository_stack,
                })
            }
        };

        self.rules[id.as_index()] = rule;
        Ok(id)
    }

    fn compile_regex(&mut self, pattern: &str) -> RegexId {
        let regex_id = RegexId(self.regexes.len() as u32);
        self.regexes.push(Regex::new(pattern.to_string()));
        regex_id
    }

    /// Returns the new repository and the stack its entries (and the rule declaring it)
    /// see.
    fn compile_repository(
        &mut self,
        raw_repository: &BTreeMap<String, RawRule>,
        repository_stack: RepositoryStack,
    ) -> Result<(RepositoryId, RepositoryStack), CompileError> {
        let repo_id = RepositoryId(self.repositories.len() as u32);

        self.repositories.push(Repository::default());
        let stack = repository_stack.push(repo_id)?;

        let mut rules = HashMap::with_capacity(raw_repository.len());
        for (name, raw_rule) in raw_repository {
            rules.insert(name.clone(), self.compile_rule(raw_rule, stack)?);
        }

        self.repositories[repo_id.0 as usize] = Repository(rules);

        Ok((repo_id, stack))
    }

    fn compile_captures(
        &mut self,
        captures: &Captures,
        repository_stack: RepositoryStack,
    ) -> Result<Vec<Option<RuleId>>, CompileError> {
        let Some(max_capture) = captures.max_index() else {
            return Ok(Vec::new());
        };
        if max_capture > MAX_CAPTURE_INDEX {
            return Err(CompileError::CaptureIndexTooLarge { index: max_capture });
        }

        let mut out: Vec<Option<RuleId>> = vec![None; max_capture + 1];
        for (index, rule) in captures.iter() {
            out[*index] = Some(self.compile_rule(rule, repository_stack)?);
        }

        Ok(out)
    }

    fn compile_patterns(
        &mut self,
        rules: &[RawRule],
        repository_stack: RepositoryStack,
    ) -> Result<Vec<RuleIdOrReference>, CompileError> {
        let mut out = Vec::with_capacity(rules.len());

        for r in rules {
            if r.is_disabled() {
                continue;
            }
            if let Some(include) = &r.include {
                // vscode ignores other rule contents is there's an include
                // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L495
                out.push(RuleIdOrReference::Reference(Reference::parse(
                    include,
                    &self.scope_name,
                )?));
            } else {
                out.push(RuleIdOrReference::RuleId(
                    self.compile_rule(r, repository_stack)?,
                ));
            }
        }

        Ok(out)
    }

    fn validate(&self) -> Result<(), CompileError> {
        for re in &self.regexes {
            re.validate().map_err(|error| CompileError::InvalidRegex {
                pattern: re.pattern().to_string(),
                error,
            })?;
        }

        for rule in &self.rules {
            let repository_stack = rule.repository_stack();
            for pattern in rule.patterns() {
                if let RuleIdOrReference::Reference(reference) = pattern
                    && self.resolve_reference(reference, repository_stack).is_none()
                {
                    return Err(CompileError::UnresolvedInclude {
                        include: reference.to_string(),
                    });
                }
            }
        }

        self.check_include_cycles()
    }

    /// An include-only rule that ends up including itself without anything to match
    /// on the way can never produce a token.
    fn check_include_cycles(&self) -> Result<(), CompileError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !matches!(rule, Rule::IncludeOnly(_)) {
                continue;
            }
            let id = RuleId(index as u32);
            if self.collect_patterns(id).is_empty() && self.includes_itself(id) {
                return Err(CompileError::EmptyIncludeCycle {
                    rule: self.describe_rule(id),
                });
            }
        }
        Ok(())
    }

    fn includes_itself(&self, start: RuleId) -> bool {
        let mut visited = HashSet::new();
        let mut todo = vec![start];

        while let Some(id) = todo.pop() {
            if !visited.insert(id) {
                continue;
            }
            let rule = self.rule(id);
            if !matches!(rule, Rule::IncludeOnly(_)) {
                continue;
            }
            for pattern in rule.patterns() {
                match self.resolve(pattern, rule.repository_stack()) {
                    Some(target) if target == start => return true,
                    Some(target) => todo.push(target),
                    None => {}
                }
            }
        }
        false
    }

    fn describe_rule(&self, id: RuleId) -> String {
        if id == ROOT_RULE_ID {
            return "$self".to_string();
        }
        self.repositories
            .iter()
            .flat_map(|repo| repo.0.iter())
            .find(|(_, rule_id)| **rule_id == id)
            .map(|(name, _)| format!("#{name}"))
            .unwrap_or_else(|| format!("rule {}", id.0))
    }

    pub fn resolve_reference(
        &self,
        reference: &Reference,
        repository_stack: RepositoryStack,
    ) -> Option<RuleId> {
        match reference {
            Reference::Self_ | Reference::Base => Some(ROOT_RULE_ID),
            Reference::Local(name) => repository_stack
                .innermost_first()
                .find_map(|repo| self.repositories[repo.0 as usize].get(name)),
            Reference::TopLevel(name) => self.repository_rule(name),
        }
    }

    #[inline]
    fn resolve(&self, pattern: &RuleIdOrReference, repository_stack: RepositoryStack) -> Option<RuleId> {
        match pattern {
            RuleIdOrReference::RuleId(id) => Some(*id),
            RuleIdOrReference::Reference(reference) => {
                self.resolve_reference(reference, repository_stack)
            }
        }
    }

    /// Flattens the children of a rule into the regexes to try, in priority order.
    ///
    /// References are looked up now, include-only groups are expanded in place and
    /// a rule reached twice is only kept at its first position: a later copy could never
    /// win a tie anyway.
    pub fn collect_patterns(&self, rule_id: RuleId) -> Vec<(RuleId, RegexId)> {
        let rule = self.rule(rule_id);
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.collect_from_list(rule.patterns(), rule.repository_stack(), &mut visited, &mut out);
        out
    }

    fn collect_from_list(
        &self,
        patterns: &[RuleIdOrReference],
        repository_stack: RepositoryStack,
        visited: &mut HashSet<RuleId>,
        out: &mut Vec<(RuleId, RegexId)>,
    ) {
        for pattern in patterns {
            if let Some(target) = self.resolve(pattern, repository_stack) {
                self.collect_rule(target, visited, out);
            }
        }
    }

    fn collect_rule(
        &self,
        rule_id: RuleId,
        visited: &mut HashSet<RuleId>,
        out: &mut Vec<(RuleId, RegexId)>,
    ) {
        if !visited.insert(rule_id) {
            return;
        }

        match self.rule(rule_id) {
            Rule::Match(Match { regex_id, .. }) => {
                if let Some(regex_id) = regex_id {
                    out.push((rule_id, *regex_id));
                }
            }
            Rule::BeginEnd(b) => out.push((rule_id, b.begin)),
            Rule::BeginWhile(b) => out.push((rule_id, b.begin)),
            Rule::IncludeOnly(i) => {
                self.collect_from_list(&i.patterns, i.repository_stack, visited, out)
            }
            Rule::Noop => {}
        }
    }
}

/// Errors that can occur during grammar compilation
#[derive(Debug)]
pub enum CompileError {
    MissingScopeName,
    InvalidRegex { pattern: String, error: onig::Error },
    UnresolvedInclude { include: String },
    /// Includes of other grammars (`source.js`, `text.html#tags`) are not supported
    ExternalInclude { include: String },
    EmptyIncludeCycle { rule: String },
    RepositoryTooDeep,
    CaptureIndexTooLarge { index: usize },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::MissingScopeName => f.write_str("grammar has no scopeName"),
            CompileError::InvalidRegex { pattern, error } => {
                write!(f, "Invalid regex pattern '{}': {}", pattern, error)
            }
            CompileError::UnresolvedInclude { include } => {
                write!(f, "Unresolved include '{}'", include)
            }
            CompileError::ExternalInclude { include } => {
                write!(f, "Include of another grammar '{}'", include)
            }
            CompileError::EmptyIncludeCycle { rule } => {
                write!(f, "'{}' includes itself without matching anything", rule)
            }
            CompileError::RepositoryTooDeep => write!(
                f,
                "repositories are nested more than {} levels deep",
                MAX_REPOSITORY_DEPTH
            ),
            CompileError::CaptureIndexTooLarge { index } => write!(
                f,
                "capture index {} is larger than the maximum of {}",
                index, MAX_CAPTURE_INDEX
            ),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::InvalidRegex { error, .. } => Some(error),
            _ => None,
        }
    }
}
