//! Namespaces scope extension installations. An extension installed in one
//! namespace is invisible to others; the root namespace is global.

use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serialized aliases accepted for the root namespace.
const ROOT_ALIASES: [&str; 3] = ["{root}", "{}", ""];

/// A scope within which an independent set of extensions may be installed.
///
/// Serialized as `kind:value` (e.g. `wiki:demo`); the aliases `{root}` and
/// `{}` denote the global scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Namespace {
    Root,
    Scoped { kind: String, value: String },
}

impl Namespace {
    pub fn root() -> Self {
        Namespace::Root
    }

    pub fn scoped(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Namespace::Scoped {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Namespace::Root)
    }

    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        if ROOT_ALIASES.contains(&input) {
            return Ok(Namespace::Root);
        }
        match input.split_once(':') {
            Some((kind, value)) if !kind.is_empty() && !value.is_empty() => {
                Ok(Namespace::scoped(kind, value))
            }
            _ => Err(ResolveError::InvalidNamespace(input.to_string())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Root => f.write_str("{root}"),
            Namespace::Scoped { kind, value } => write!(f, "{kind}:{value}"),
        }
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Namespace {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Namespace::parse(&value)
    }
}

/// Opaque capability tag identifying the isolation domain a namespace maps to.
///
/// The engine only tracks which domain a graph entry belongs to; the actual
/// isolation mechanics (classloading, sandboxing) live with the embedder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceHandle(String);

impl NamespaceHandle {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    pub fn for_namespace(namespace: &Namespace) -> Self {
        Self(namespace.to_string())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
