use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, TmResult};
use crate::grammars::{CompileError, CompiledGrammar, RawGrammar};
use crate::options::TokenizerOptions;
use crate::tokenizer::{Token, Tokenizer};

/// Holds grammar sources by scope name and compiles them the first time they're asked for.
///
/// Compiled grammars are immutable and handed out as `Arc`s so they can be shared
/// between threads. Loading can happen concurrently from `&self`: if two threads race
/// on the same scope, both compile it but only the first one inserted is kept.
#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, RawGrammar>,
    compiled: papaya::HashMap<String, Arc<CompiledGrammar>>,
    options: TokenizerOptions,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The options used by [`Registry::tokenize`]
    pub fn with_options(options: TokenizerOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &TokenizerOptions {
        &self.options
    }

    /// Registers a grammar source under its scope name, replacing any previous grammar
    /// with the same scope.
    pub fn add_grammar(&mut self, grammar: RawGrammar) -> TmResult<()> {
        let scope_name = grammar.scope_name.trim().to_string();
        if scope_name.is_empty() {
            return Err(CompileError::MissingScopeName.into());
        }

        #[cfg(feature = "debug")]
        log::debug!("[registry] adding grammar {scope_name}");

        // A previously compiled version is now stale
        self.compiled.pin().remove(&scope_name);
        self.sources.insert(scope_name, grammar);
        Ok(())
    }

    /// Reads a grammar file (YAML, JSON or property list) and registers it
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> TmResult<()> {
        let grammar = RawGrammar::load_from_file(path)?;
        self.add_grammar(grammar)
    }

    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.sources.contains_key(scope_name)
    }

    /// Scope names of all the registered grammars, in no particular order
    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Returns the compiled grammar for that scope, compiling and caching it on first use.
    ///
    /// Grammars that fail to compile are not cached: every call reports the error again.
    pub fn load_grammar(&self, scope_name: &str) -> TmResult<Arc<CompiledGrammar>> {
        let compiled = self.compiled.pin();
        if let Some(grammar) = compiled.get(scope_name) {
            return Ok(grammar.clone());
        }

        let raw = self
            .sources
            .get(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))?;

        #[cfg(feature = "debug")]
        log::debug!("[registry] compiling grammar {scope_name}");

        let grammar = Arc::new(raw.compile()?);
        Ok(compiled
            .get_or_insert(scope_name.to_string(), grammar)
            .clone())
    }

    /// Tokenizes a whole document with the grammar of that scope, one `Vec<Token>` per line
    pub fn tokenize(&self, scope_name: &str, text: &str) -> TmResult<Vec<Vec<Token>>> {
        let grammar = self.load_grammar(scope_name)?;
        let mut tokenizer = Tokenizer::with_options(&grammar, self.options.clone());
        Ok(tokenizer.tokenize_string(text))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<_> = self.sources.keys().collect();
        scopes.sort();
        f.debug_struct("Registry")
            .field("grammars", &scopes)
            .field("compiled", &self.compiled.len())
            .field("options", &self.options)
            .finish()
    }
}
