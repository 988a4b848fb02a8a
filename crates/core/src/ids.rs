//! Typed identifiers, so RPC payloads and map keys can't be confused with
//! other plain strings.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A `Process` entity name: for `numprocs = 1` this is the bare program
/// name; for `numprocs = n > 1` it is `name:00`, `name:01`, ... per §3.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessKey(String);

impl ProcessKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Builds the instance key for `numprocs > 1`: `name:00`, `name:01`, ...
    pub fn instance(name: &str, index: u32, numprocs: u32) -> Self {
        if numprocs <= 1 {
            Self(name.to_string())
        } else {
            Self(format!("{name}:{index:02}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ProcessKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcessKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A group name. Singleton groups (no `group = ` configured) use the
/// program name as their `GroupKey`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_key_bare_for_single_process() {
        assert_eq!(ProcessKey::instance("web", 0, 1).as_str(), "web");
    }

    #[test]
    fn instance_key_zero_padded_for_multi_process() {
        assert_eq!(ProcessKey::instance("web", 0, 3).as_str(), "web:00");
        assert_eq!(ProcessKey::instance("web", 2, 3).as_str(), "web:02");
    }
}
