//! In-memory extension graph: per-namespace installed state and the
//! dependency forests built from it.
//!
//! The graph is read by the plan resolver and mutated only by the plan
//! executor. Mutations take a per-namespace write lock, finer than the job
//! group paths, so concurrent jobs on disjoint namespaces never observe torn
//! reads.

use crate::extension::namespace::{Namespace, NamespaceHandle};
use crate::extension::InstalledExtension;
use crate::extension::Extension;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A node in a namespace's dependency forest. Children are the node's
/// resolved transitive dependencies at build time. Immutable once
/// constructed; forests are rebuilt, not mutated, when installs change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionNode {
    pub namespace: Namespace,
    pub extension: Extension,
    pub children: Vec<ExtensionNode>,
}

impl ExtensionNode {
    /// Total number of nodes in this subtree, self included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(ExtensionNode::size).sum::<usize>()
    }

    /// True when `id` appears anywhere in this subtree.
    pub fn contains(&self, id: &str) -> bool {
        self.extension.id.id == id || self.children.iter().any(|c| c.contains(id))
    }
}

#[derive(Default)]
struct NamespaceEntries {
    installed: BTreeMap<String, InstalledExtension>,
    roots: Vec<ExtensionNode>,
}

struct NamespaceState {
    handle: NamespaceHandle,
    entries: RwLock<NamespaceEntries>,
}

/// Per-namespace index of installed extensions.
#[derive(Default)]
pub struct ExtensionGraph {
    namespaces: RwLock<HashMap<Namespace, Arc<NamespaceState>>>,
}

impl ExtensionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, namespace: &Namespace) -> Arc<NamespaceState> {
        if let Some(state) = self.namespaces.read().get(namespace) {
            return Arc::clone(state);
        }
        let mut namespaces = self.namespaces.write();
        Arc::clone(namespaces.entry(namespace.clone()).or_insert_with(|| {
            Arc::new(NamespaceState {
                handle: NamespaceHandle::for_namespace(namespace),
                entries: RwLock::new(NamespaceEntries::default()),
            })
        }))
    }

    /// Isolation-domain handle for a namespace. Creating it is cheap; the
    /// handle is only a tag for the embedder's isolation machinery.
    pub fn handle(&self, namespace: &Namespace) -> NamespaceHandle {
        self.state(namespace).handle.clone()
    }

    /// Namespaces with at least one recorded installation.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let namespaces = self.namespaces.read();
        let mut out: Vec<Namespace> = namespaces
            .iter()
            .filter(|(_, state)| !state.entries.read().installed.is_empty())
            .map(|(ns, _)| ns.clone())
            .collect();
        out.sort_by_key(|ns| ns.to_string());
        out
    }

    /// Installed extension with the given id in exactly this namespace.
    pub fn installed(&self, namespace: &Namespace, id: &str) -> Option<InstalledExtension> {
        self.state(namespace).entries.read().installed.get(id).cloned()
    }

    /// All extensions installed in this namespace, ordered by id.
    pub fn installed_in(&self, namespace: &Namespace) -> Vec<InstalledExtension> {
        self.state(namespace)
            .entries
            .read()
            .installed
            .values()
            .cloned()
            .collect()
    }

    /// The namespace's dependency forest: one root per explicitly installed
    /// extension, children resolved against the installed set.
    pub fn nodes(&self, namespace: &Namespace) -> Vec<ExtensionNode> {
        self.state(namespace).entries.read().roots.clone()
    }

    /// Record an installation performed by the plan executor. Replaces any
    /// previous record for the same id and rebuilds the forest.
    pub fn install(&self, namespace: &Namespace, extension: Extension, dependency: bool) {
        let state = self.state(namespace);
        let mut entries = state.entries.write();
        let id = extension.id.id.clone();
        // An explicit install of something previously pulled in as a
        // dependency promotes it to a first-class install.
        let dependency = match entries.installed.get(&id) {
            Some(existing) => dependency && existing.dependency,
            None => dependency,
        };
        entries
            .installed
            .insert(id, InstalledExtension::new(extension, dependency));
        entries.roots = build_forest(namespace, &entries.installed);
    }

    /// Seed a pre-existing installation record, preserving its flags. Used to
    /// load persisted state and to arrange test fixtures.
    pub fn seed(&self, namespace: &Namespace, installed: InstalledExtension) {
        let state = self.state(namespace);
        let mut entries = state.entries.write();
        entries
            .installed
            .insert(installed.extension.id.id.clone(), installed);
        entries.roots = build_forest(namespace, &entries.installed);
    }

    /// Remove an installation record. Returns false when nothing was
    /// installed under that id.
    pub fn uninstall(&self, namespace: &Namespace, id: &str) -> bool {
        let state = self.state(namespace);
        let mut entries = state.entries.write();
        let removed = entries.installed.remove(id).is_some();
        if removed {
            entries.roots = build_forest(namespace, &entries.installed);
        }
        removed
    }

    /// Mark an installed extension valid or invalid. Returns false when the
    /// id is not installed in the namespace.
    pub fn set_valid(&self, namespace: &Namespace, id: &str, valid: bool) -> bool {
        let state = self.state(namespace);
        let mut entries = state.entries.write();
        match entries.installed.get_mut(id) {
            Some(installed) => {
                installed.valid = valid;
                true
            }
            None => false,
        }
    }
}

fn build_forest(
    namespace: &Namespace,
    installed: &BTreeMap<String, InstalledExtension>,
) -> Vec<ExtensionNode> {
    installed
        .values()
        .filter(|entry| !entry.dependency)
        .map(|entry| {
            let mut path = HashSet::new();
            build_node(namespace, &entry.extension, installed, &mut path)
        })
        .collect()
}

fn build_node(
    namespace: &Namespace,
    extension: &Extension,
    installed: &BTreeMap<String, InstalledExtension>,
    path: &mut HashSet<String>,
) -> ExtensionNode {
    path.insert(extension.id.id.clone());
    let mut children = Vec::new();
    for dep in &extension.dependencies {
        if path.contains(&dep.id) {
            continue;
        }
        if let Some(child) = installed.get(&dep.id) {
            children.push(build_node(namespace, &child.extension, installed, path));
        }
    }
    path.remove(&extension.id.id);
    ExtensionNode {
        namespace: namespace.clone(),
        extension: extension.clone(),
        children,
    }
}
