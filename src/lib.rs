//! A TextMate grammar engine.
//!
//! Grammars are loaded from YAML, JSON or plist sources, validated once when compiled
//! and then used to split lines of text into tokens carrying hierarchical scope names.
//! The [`build`] module packages a grammar source into the artifacts editors load.
//!
//! ```no_run
//! use tmgrammar::Registry;
//!
//! let mut registry = Registry::new();
//! registry.add_grammar_from_path("grammars/csharp.tmLanguage.yml")?;
//! let lines = registry.tokenize("source.cs", "var x = 1;")?;
//! for token in &lines[0] {
//!     println!("{:?} {:?}", token.span, token.scopes);
//! }
//! # Ok::<(), tmgrammar::Error>(())
//! ```

mod error;
mod options;
mod registry;
mod scope;
mod tokenizer;

pub mod build;
pub mod grammars;

pub use error::{Error, TmResult};
pub use grammars::{CompileError, CompiledGrammar, GrammarFormat, RawGrammar};
pub use options::{DEFAULT_MATCH_RETRY_LIMIT, DEFAULT_MAX_STALLED_ITERATIONS, TokenizerOptions};
pub use registry::Registry;
pub use scope::{Scope, parse_scope_names};
pub use tokenizer::{LineTokens, StateStack, Token, Tokenizer, tokenize_line};
