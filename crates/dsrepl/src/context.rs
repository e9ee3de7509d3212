//! Target contexts and credentials supplied when opening a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// What a session is bound against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// Any server holding the named domain.
    #[default]
    Domain,
    /// Any server in the named forest.
    Forest,
    /// One specific server by name.
    DirectoryServer,
    /// Any instance in a named configuration set (application-mode directory).
    ConfigurationSet,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextKind::Domain => "domain",
            ContextKind::Forest => "forest",
            ContextKind::DirectoryServer => "directory server",
            ContextKind::ConfigurationSet => "configuration set",
        };
        write!(f, "{}", s)
    }
}

/// A target context: kind plus the name to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContext {
    /// Context kind.
    pub kind: ContextKind,
    /// Domain, forest, server or configuration-set name.
    pub name: String,
}

impl DirectoryContext {
    /// Create a context of any kind.
    pub fn new(kind: ContextKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Domain context.
    pub fn domain(name: impl Into<String>) -> Self {
        Self::new(ContextKind::Domain, name)
    }

    /// Forest context.
    pub fn forest(name: impl Into<String>) -> Self {
        Self::new(ContextKind::Forest, name)
    }

    /// Specific server context.
    pub fn server(name: impl Into<String>) -> Self {
        Self::new(ContextKind::DirectoryServer, name)
    }

    /// Configuration-set context.
    pub fn configuration_set(name: impl Into<String>) -> Self {
        Self::new(ContextKind::ConfigurationSet, name)
    }
}

impl fmt::Display for DirectoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Bind credentials. The password is wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Explicit user name and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The caller's ambient identity (no explicit user).
    pub fn integrated() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
        }
    }

    /// User name, empty for integrated credentials.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password, empty for integrated credentials.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// True when no explicit user was given.
    pub fn is_integrated(&self) -> bool {
        self.username.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
