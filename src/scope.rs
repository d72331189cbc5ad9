//! Interned scope names.
//!
//! Scopes like "comment.block.cs" are interned once in a global repository and handed out
//! as `&'static str`, so a `Scope` is a cheap `Copy` value that still keeps the full,
//! untruncated name.

use std::collections::HashSet;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// A scope represents a hierarchical classification such as "string.quoted.double.cs"
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Scope(&'static str);

impl Scope {
    /// Interns the given dot-separated name. Surrounding whitespace is ignored.
    pub fn new(s: &str) -> Scope {
        let s = s.trim();
        if s.is_empty() {
            return Scope::default();
        }
        let mut repo = lock_global_scope_repo();
        repo.intern(s)
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }

    /// Iterates over the dot-separated atoms
    pub fn atoms(self) -> impl Iterator<Item = &'static str> {
        self.0.split('.').filter(|a| !a.is_empty())
    }

    /// Number of atoms in this scope
    pub fn len(self) -> usize {
        self.atoms().count()
    }

    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }

    /// Checks whether this scope is an atom-wise prefix of another one:
    /// `comment` is a prefix of `comment.line` but not of `comments`.
    pub fn is_prefix_of(self, other: Scope) -> bool {
        if self.is_empty() {
            return true;
        }
        match other.0.strip_prefix(self.0) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

/// Splits a rule `name` into its scopes.
/// e.g. "string.json support.type.property-name.json" gives two scopes
pub fn parse_scope_names(name: &str) -> Vec<Scope> {
    name.split_whitespace().map(Scope::new).collect()
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl PartialEq<str> for Scope {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Scope {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Scope::new(&name))
    }
}

/// Every scope name ever seen, leaked so they can be shared as `&'static str`.
/// Grammars only have a bounded set of names so this doesn't grow with the input text.
#[derive(Default)]
struct ScopeRepository {
    names: HashSet<&'static str>,
}

impl ScopeRepository {
    fn intern(&mut self, name: &str) -> Scope {
        if let Some(existing) = self.names.get(name) {
            return Scope(existing);
        }
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        self.names.insert(leaked);
        Scope(leaked)
    }
}

static SCOPE_REPO: LazyLock<Mutex<ScopeRepository>> =
    LazyLock::new(|| Mutex::new(ScopeRepository::default()));

fn lock_global_scope_repo() -> MutexGuard<'static, ScopeRepository> {
    // The repository is only ever appended to so a poisoned lock is still consistent
    SCOPE_REPO.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_scope_creation() {
        let scope = Scope::new("source.cs.meta.interpolation");
        assert_eq!(scope.len(), 4);
        assert_eq!(scope.as_str(), "source.cs.meta.interpolation");
    }

    #[test]
    fn test_empty_scope() {
        let scope = Scope::new("  ");
        assert_eq!(scope.len(), 0);
        assert!(scope.is_empty());
        assert_eq!(scope.to_string(), "");
    }

    #[test]
    fn test_interning_is_shared() {
        let a = Scope::new("comment.block.cs");
        let b = Scope::new(" comment.block.cs ");
        assert_eq!(a, b);
        assert!(std::ptr::eq(a.as_str(), b.as_str()));
    }

    #[test]
    fn test_prefix_matching() {
        let prefix = Scope::new("comment");
        assert!(prefix.is_prefix_of(Scope::new("comment.line.double-slash.cs")));
        assert!(prefix.is_prefix_of(prefix));
        assert!(!prefix.is_prefix_of(Scope::new("comments.line")));
        assert!(!prefix.is_prefix_of(Scope::new("string.comment")));
        assert!(Scope::default().is_prefix_of(prefix));
    }

    #[test]
    fn test_no_truncation_of_long_scopes() {
        let long_scope = Scope::new("a.b.c.d.e.f.g.h.i.j.k.l");
        assert_eq!(long_scope.len(), 12);
        assert_eq!(long_scope.as_str(), "a.b.c.d.e.f.g.h.i.j.k.l");
    }

    #[test]
    fn test_parse_multiple_names() {
        let scopes = parse_scope_names("string.json  support.type.property-name.json");
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0], "string.json");
        assert_eq!(scopes[1], "support.type.property-name.json");
    }
}
