//! Extension model: versioned installable units, their dependency
//! declarations, and per-namespace installed state.

use crate::version::{ExtensionId, VersionConstraint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod graph;
pub mod namespace;
pub mod repository;

pub use graph::{ExtensionGraph, ExtensionNode};
pub use namespace::{Namespace, NamespaceHandle};
pub use repository::{ExtensionRepository, MemoryExtensionRepository};

/// A dependency declared by an extension on another extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDependency {
    pub id: String,
    pub constraint: VersionConstraint,
    /// Optional dependencies that cannot be resolved are skipped rather than
    /// failing the plan.
    #[serde(default)]
    pub optional: bool,
}

impl ExtensionDependency {
    pub fn new(id: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            id: id.into(),
            constraint,
            optional: false,
        }
    }

    pub fn optional(id: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            id: id.into(),
            constraint,
            optional: true,
        }
    }
}

/// An identifiable, versioned unit of installable functionality as described
/// by the repository backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub id: ExtensionId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ExtensionDependency>,
    /// Identifier of the repository this descriptor came from, when known.
    #[serde(default)]
    pub source: Option<String>,
}

impl Extension {
    pub fn new(id: ExtensionId) -> Self {
        Self {
            id,
            name: None,
            dependencies: Vec::new(),
            source: None,
        }
    }

    pub fn with_dependencies(id: ExtensionId, dependencies: Vec<ExtensionDependency>) -> Self {
        Self {
            id,
            name: None,
            dependencies,
            source: None,
        }
    }
}

/// An extension installed in one namespace, with its install-time state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledExtension {
    pub extension: Extension,
    /// True when the extension is present only because something else
    /// required it, not because a caller explicitly requested it.
    pub dependency: bool,
    /// False when the installation is known broken or incompatible and needs
    /// a repair pass.
    pub valid: bool,
    /// Installed outside this engine's control; never considered for
    /// automatic uninstall.
    #[serde(default)]
    pub managed_externally: bool,
    pub installed_at: DateTime<Utc>,
}

impl InstalledExtension {
    pub fn new(extension: Extension, dependency: bool) -> Self {
        Self {
            extension,
            dependency,
            valid: true,
            managed_externally: false,
            installed_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &ExtensionId {
        &self.extension.id
    }
}
