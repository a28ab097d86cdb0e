//! Hierarchical entity paths.
//!
//! Every graph entity is identified by a slash-separated [`Path`]
//! (e.g. `/synth/osc/freq`). The last segment is the entity's [`Symbol`],
//! unique among its siblings. Symbols match `[A-Za-z_][A-Za-z0-9_]*`.

use std::fmt;

use thiserror::Error;

/// Errors from parsing paths and symbols.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The string is not an absolute slash-separated path.
    #[error("not an absolute path: '{0}'")]
    NotAbsolute(String),

    /// A path segment is not a valid symbol.
    #[error("invalid symbol: '{0}'")]
    InvalidSymbol(String),

    /// The path has a trailing slash or an empty segment.
    #[error("empty segment in path: '{0}'")]
    EmptySegment(String),
}

/// A single path segment: `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(String);

impl Symbol {
    /// Parses and validates a symbol.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if Self::is_valid(s) {
            Ok(Symbol(s.to_owned()))
        } else {
            Err(PathError::InvalidSymbol(s.to_owned()))
        }
    }

    /// Returns true if `s` is a valid symbol.
    pub fn is_valid(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Returns the symbol as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An absolute hierarchical path: `/`, `/symbol`, `/a/b/...`.
///
/// Paths are stored normalized (no trailing slash except for the root).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(String);

impl Path {
    /// The root path `/`.
    pub fn root() -> Self {
        Path("/".to_owned())
    }

    /// Parses and validates an absolute path.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s == "/" {
            return Ok(Self::root());
        }
        if !s.starts_with('/') {
            return Err(PathError::NotAbsolute(s.to_owned()));
        }
        for segment in s[1..].split('/') {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(s.to_owned()));
            }
            if !Symbol::is_valid(segment) {
                return Err(PathError::InvalidSymbol(segment.to_owned()));
            }
        }
        Ok(Path(s.to_owned()))
    }

    /// Returns the path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the root path `/`.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Path::root()),
            Some(i) => Some(Path(self.0[..i].to_owned())),
            None => None,
        }
    }

    /// Returns the last segment, or `None` for the root.
    pub fn symbol(&self) -> Option<Symbol> {
        if self.is_root() {
            return None;
        }
        self.0.rfind('/').map(|i| Symbol(self.0[i + 1..].to_owned()))
    }

    /// Appends a symbol, yielding a child path.
    pub fn child(&self, symbol: &Symbol) -> Path {
        if self.is_root() {
            Path(format!("/{}", symbol))
        } else {
            Path(format!("{}/{}", self.0, symbol))
        }
    }

    /// Returns true if `self` is the immediate parent of `other`.
    pub fn is_parent_of(&self, other: &Path) -> bool {
        other.parent().as_ref() == Some(self)
    }

    /// Returns true if `other` is `self` or lies below it.
    pub fn is_ancestor_of_or_self(&self, other: &Path) -> bool {
        if self.is_root() || self == other {
            return true;
        }
        other.0.starts_with(&self.0)
            && other.0.as_bytes().get(self.0.len()) == Some(&b'/')
    }

    /// Iterates the path's segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Rewrites a descendant path when `old_base` moves to `new_base`.
    ///
    /// `self` must be `old_base` itself or a descendant of it.
    pub fn rebased(&self, old_base: &Path, new_base: &Path) -> Path {
        if self == old_base {
            return new_base.clone();
        }
        debug_assert!(old_base.is_ancestor_of_or_self(self));
        let tail = &self.0[old_base.0.len()..];
        Path(format!("{}{}", new_base.0, tail))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
