//! Address book type definitions
//!
//! Enums shared by backends, configuration and hosts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether the book talks to the server or only to its offline cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookMode {
    /// Offline; reads come from the cache, writes are refused.
    Local,
    /// Online (default state).
    #[default]
    Remote,
}

impl BookMode {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BookMode::Local => "local",
            BookMode::Remote => "remote",
        }
    }
}

impl fmt::Display for BookMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BookMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(BookMode::Local),
            "remote" => Ok(BookMode::Remote),
            _ => Err(ParseEnumError::new("book mode", s, "local, remote")),
        }
    }
}

/// Transport encryption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain transport only.
    Never,
    /// Upgrade when the server supports it, fall back to plain otherwise.
    #[default]
    WhenPossible,
    /// Refuse to bind over plain transport.
    Always,
}

impl TlsMode {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Never => "never",
            TlsMode::WhenPossible => "when_possible",
            TlsMode::Always => "always",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" | "no" => Ok(TlsMode::Never),
            "when_possible" | "whenever_possible" => Ok(TlsMode::WhenPossible),
            "always" => Ok(TlsMode::Always),
            _ => Err(ParseEnumError::new(
                "TLS mode",
                s,
                "never, when_possible, always",
            )),
        }
    }
}

/// Depth of a directory search below its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// The base entry only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything below it.
    #[default]
    Subtree,
}

impl SearchScope {
    /// Get the string representation used in LDAP URLs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Base => "base",
            SearchScope::OneLevel => "one",
            SearchScope::Subtree => "sub",
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SearchScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "one" | "onelevel" => Ok(SearchScope::OneLevel),
            "sub" | "subtree" => Ok(SearchScope::Subtree),
            _ => Err(ParseEnumError::new("search scope", s, "base, one, sub")),
        }
    }
}

/// Error parsing one of the enums in this module.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
    expected: &'static str,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            what,
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}', expected one of: {}",
            self.what, self.value, self.expected
        )
    }
}

impl std::error::Error for ParseEnumError {}
