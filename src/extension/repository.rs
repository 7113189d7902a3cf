//! Abstract extension repository backend and the in-memory implementation
//! used by tests and embedders without a remote catalog.

use crate::error::ResolveError;
use crate::extension::Extension;
use crate::version::{Version, VersionConstraint};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Version-resolution backend. Implementations answer which versions of an
/// extension exist and return the descriptor for the best match of a
/// constraint. Network catalogs, local caches and composite lookups all live
/// behind this seam.
pub trait ExtensionRepository: Send + Sync {
    /// Descriptor for the highest available version satisfying `constraint`.
    fn resolve(&self, id: &str, constraint: &VersionConstraint) -> Result<Extension, ResolveError>;

    /// All known versions of `id`, ascending.
    fn versions(&self, id: &str) -> Result<Vec<Version>, ResolveError>;
}

/// In-memory repository keyed by extension id, versions kept sorted.
#[derive(Default)]
pub struct MemoryExtensionRepository {
    extensions: RwLock<HashMap<String, BTreeMap<Version, Extension>>>,
}

impl MemoryExtensionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, extension: Extension) {
        let mut extensions = self.extensions.write();
        extensions
            .entry(extension.id.id.clone())
            .or_default()
            .insert(extension.id.version.clone(), extension);
    }
}

impl ExtensionRepository for MemoryExtensionRepository {
    fn resolve(&self, id: &str, constraint: &VersionConstraint) -> Result<Extension, ResolveError> {
        let extensions = self.extensions.read();
        extensions
            .get(id)
            .and_then(|versions| {
                versions
                    .iter()
                    .rev()
                    .find(|&(version, _)| constraint.matches(version))
                    .map(|(_, extension)| extension.clone())
            })
            .ok_or_else(|| ResolveError::ExtensionNotFound {
                id: id.to_string(),
                constraint: constraint.clone(),
            })
    }

    fn versions(&self, id: &str) -> Result<Vec<Version>, ResolveError> {
        let extensions = self.extensions.read();
        Ok(extensions
            .get(id)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default())
    }
}
