use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::grammars::CompileError;

pub type TmResult<T> = Result<T, Error>;

/// Errors that can occur when loading, compiling or packaging a grammar.
///
/// Tokenization itself never errors.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar source or writing a build artifact
    Io(io::Error),

    /// JSON parsing or serialization failed.
    Json(serde_json::Error),

    /// YAML parsing failed when loading a grammar source.
    Yaml(serde_yaml::Error),

    /// Property list parsing or serialization failed.
    Plist(plist::Error),

    /// The grammar was parsed but is not valid: bad regex, unresolved include...
    Compile(CompileError),

    /// A grammar was not found in the registry.
    /// Only happens when asking to load a scope name that was never added
    GrammarNotFound(String),

    /// We can't tell the source format of that file from its extension
    UnsupportedFormat(PathBuf),

    /// The JSON artifact needs the source revision it was built from
    MissingRevision,

    /// A commit hash that is not a full 40 characters hex sha
    InvalidCommit(String),

    /// An external command (eg `git`) failed or could not be spawned.
    #[allow(missing_docs)]
    ExternalCommand { command: String, message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Yaml(err) => write!(f, "YAML parsing error: {}", err),
            Error::Plist(err) => write!(f, "plist error: {}", err),
            Error::Compile(err) => write!(f, "invalid grammar: {}", err),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::UnsupportedFormat(path) => {
                write!(f, "unsupported grammar format for '{}'", path.display())
            }
            Error::MissingRevision => {
                write!(f, "a source revision is required to build the JSON grammar")
            }
            Error::InvalidCommit(sha) => {
                write!(f, "'{}' is not a full hexadecimal commit hash", sha)
            }
            Error::ExternalCommand { command, message } => {
                write!(f, "command `{}` failed: {}", command, message)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Yaml(err) => Some(err),
            Error::Plist(err) => Some(err),
            Error::Compile(err) => Some(err),
            Error::GrammarNotFound(_)
            | Error::UnsupportedFormat(_)
            | Error::MissingRevision
            | Error::InvalidCommit(_)
            | Error::ExternalCommand { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Yaml(err)
    }
}

impl From<plist::Error> for Error {
    fn from(err: plist::Error) -> Self {
        Error::Plist(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Error::Compile(err)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io(err.error)
    }
}
