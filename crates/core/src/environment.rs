//! Named database environments
//!
//! An environment is a label (`development`, `test`, `production`, or
//! anything else) that the outer layer uses to select a connection
//! configuration. The engine treats it as opaque apart from the
//! protected-environment gate used by destructive tasks.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment(name.into())
    }

    pub fn development() -> Self {
        Environment::new("development")
    }

    pub fn test() -> Self {
        Environment::new("test")
    }

    pub fn production() -> Self {
        Environment::new("production")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environments where destructive operations (drop, schema load
    /// over existing data) require explicit confirmation from callers.
    pub fn is_protected(&self) -> bool {
        matches!(self.0.as_str(), "production" | "staging")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::development()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
