//! Plan resolver: computes the ordered reconciliation plan from a requested
//! target state and the currently installed extensions.
//!
//! Resolution is deterministic: identical targets against an identical graph
//! always produce the same plan, action for action.

use crate::error::ResolveError;
use crate::extension::{Extension, ExtensionGraph, InstalledExtension, Namespace};
use crate::extension::repository::ExtensionRepository;
use crate::plan::{ActionKind, CircularDependency, ExtensionPlan, ExtensionPlanAction};
use crate::version::{ExtensionId, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// How installed-version lookup treats an extension only present in the root
/// namespace when the target addresses a child namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritancePolicy {
    /// A child-namespace request produces a child-scoped install that shadows
    /// the root installation.
    #[default]
    ShadowParent,
    /// Treat the root installation as present in the child: same version
    /// yields a repair, different versions an upgrade or downgrade.
    RepairOnShadow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub inheritance: InheritancePolicy,
}

/// One requested element of the target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetExtension {
    pub id: ExtensionId,
    pub namespace: Namespace,
}

impl TargetExtension {
    pub fn new(id: ExtensionId, namespace: Namespace) -> Self {
        Self { id, namespace }
    }
}

/// Computes reconciliation plans. Stateless apart from its repository handle;
/// a single resolver can serve any number of concurrent jobs.
pub struct PlanResolver {
    repository: Arc<dyn ExtensionRepository>,
    config: ResolverConfig,
}

struct DesiredEntry {
    extension: Extension,
    explicit: bool,
    constraint: VersionConstraint,
    /// Ids of resolved dependencies, declaration order. Cycle-closing edges
    /// are never recorded, so these edges always form a DAG.
    deps: Vec<String>,
}

struct Expansion<'g> {
    namespace: Namespace,
    graph: &'g ExtensionGraph,
    entries: Vec<DesiredEntry>,
    index: HashMap<String, usize>,
    cycles: Vec<CircularDependency>,
}

impl PlanResolver {
    pub fn new(repository: Arc<dyn ExtensionRepository>) -> Self {
        Self {
            repository,
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(repository: Arc<dyn ExtensionRepository>, config: ResolverConfig) -> Self {
        Self { repository, config }
    }

    /// Resolve the ordered plan reaching `targets` from the state recorded in
    /// `graph`. Each target namespace is resolved independently; the merged
    /// plan preserves per-namespace order.
    pub fn resolve(
        &self,
        targets: &[TargetExtension],
        graph: &ExtensionGraph,
    ) -> Result<ExtensionPlan, ResolveError> {
        let mut namespace_order: Vec<Namespace> = Vec::new();
        let mut per_namespace: HashMap<Namespace, Vec<TargetExtension>> = HashMap::new();

        for target in targets {
            if !per_namespace.contains_key(&target.namespace) {
                namespace_order.push(target.namespace.clone());
            }
            let list = per_namespace.entry(target.namespace.clone()).or_default();
            if let Some(previous) = list.iter().find(|t| t.id.id == target.id.id) {
                if previous.id.version == target.id.version {
                    continue;
                }
                return Err(ResolveError::AmbiguousTarget {
                    id: target.id.id.clone(),
                    first: previous.id.version.clone(),
                    second: target.id.version.clone(),
                });
            }
            list.push(target.clone());
        }

        let mut actions = Vec::new();
        let mut cycles = Vec::new();
        for namespace in &namespace_order {
            let (mut namespace_actions, mut namespace_cycles) =
                self.resolve_namespace(namespace, &per_namespace[namespace], graph)?;
            actions.append(&mut namespace_actions);
            cycles.append(&mut namespace_cycles);
        }

        debug!(
            targets = targets.len(),
            actions = actions.len(),
            cycles = cycles.len(),
            "resolved extension plan"
        );
        Ok(ExtensionPlan::new(actions, cycles))
    }

    fn resolve_namespace(
        &self,
        namespace: &Namespace,
        targets: &[TargetExtension],
        graph: &ExtensionGraph,
    ) -> Result<(Vec<ExtensionPlanAction>, Vec<CircularDependency>), ResolveError> {
        let mut expansion = Expansion {
            namespace: namespace.clone(),
            graph,
            entries: Vec::new(),
            index: HashMap::new(),
            cycles: Vec::new(),
        };

        let mut path = Vec::new();
        for target in targets {
            let constraint = VersionConstraint::Exact(target.id.version.clone());
            let extension = self.descriptor_for(&expansion, &target.id.id, &constraint)?;
            self.expand(&mut expansion, extension, true, constraint, &mut path)?;
        }

        // Uninstalls: installed extensions not reachable from the desired
        // set, skipping anything managed outside this engine. Dependents are
        // removed before the dependencies they were the sole consumer of.
        let removed: Vec<InstalledExtension> = graph
            .installed_in(namespace)
            .into_iter()
            .filter(|installed| !expansion.index.contains_key(&installed.extension.id.id))
            .filter(|installed| !installed.managed_externally)
            .collect();
        let uninstall_order = reverse_topological(&removed);

        let mut actions = Vec::new();
        for installed in uninstall_order {
            actions.push(ExtensionPlanAction {
                extension: installed.extension.clone(),
                rewritten_extension: None,
                previous_extensions: vec![installed.clone()],
                action: ActionKind::Uninstall,
                namespace: namespace.clone(),
                is_dependency: installed.dependency,
            });
        }

        // Installs/upgrades/repairs in forward topological order: a
        // dependency's action always precedes its dependents'. Ties keep
        // first-requested order.
        for entry_index in forward_topological(&expansion.entries, &expansion.index) {
            let entry = &expansion.entries[entry_index];
            actions.push(self.diff_entry(&expansion, entry));
        }

        Ok((actions, expansion.cycles))
    }

    /// Desired-state expansion: add `extension` (and, recursively, its
    /// declared dependencies) to the desired set, visiting each id at most
    /// once per namespace.
    fn expand(
        &self,
        expansion: &mut Expansion<'_>,
        extension: Extension,
        explicit: bool,
        constraint: VersionConstraint,
        path: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        let id = extension.id.id.clone();

        if extension.dependencies.iter().any(|dep| dep.id == id) {
            return Err(ResolveError::SelfDependency(id));
        }

        if let Some(&existing_index) = expansion.index.get(&id) {
            let existing = &expansion.entries[existing_index];
            let merged = existing.constraint.merge(&constraint).ok_or_else(|| {
                ResolveError::IncompatibleVersions {
                    id: id.clone(),
                    existing: existing.constraint.clone(),
                    requested: constraint.clone(),
                }
            })?;

            if merged.matches(&existing.extension.id.version) {
                expansion.entries[existing_index].constraint = merged;
                expansion.entries[existing_index].explicit |= explicit;
                return Ok(());
            }

            // The merged requirement rules out the previously chosen version:
            // re-resolve and re-expand the replacement's dependencies.
            let replacement = self.descriptor_for(expansion, &id, &merged)?;
            expansion.entries[existing_index].extension = replacement.clone();
            expansion.entries[existing_index].constraint = merged;
            expansion.entries[existing_index].explicit |= explicit;
            expansion.entries[existing_index].deps.clear();
            return self.expand_dependencies(expansion, &replacement, path);
        }

        expansion.index.insert(id.clone(), expansion.entries.len());
        expansion.entries.push(DesiredEntry {
            extension: extension.clone(),
            explicit,
            constraint,
            deps: Vec::new(),
        });
        self.expand_dependencies(expansion, &extension, path)
    }

    fn expand_dependencies(
        &self,
        expansion: &mut Expansion<'_>,
        extension: &Extension,
        path: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        let id = extension.id.id.clone();
        path.push(id.clone());

        for dep in &extension.dependencies {
            if let Some(position) = path.iter().position(|p| p == &dep.id) {
                let mut chain: Vec<String> = path[position..].to_vec();
                chain.push(dep.id.clone());
                debug!(chain = ?chain, "circular dependency detected");
                expansion.cycles.push(CircularDependency {
                    namespace: expansion.namespace.clone(),
                    chain,
                });
                continue;
            }

            let resolved = self.descriptor_for(expansion, &dep.id, &dep.constraint);
            let dep_extension = match resolved {
                Ok(dep_extension) => dep_extension,
                Err(err @ ResolveError::ExtensionNotFound { .. }) if dep.optional => {
                    debug!(dependency = %dep.id, error = %err, "skipping optional dependency");
                    continue;
                }
                Err(err) => {
                    path.pop();
                    return Err(err);
                }
            };

            if let Err(err) =
                self.expand(expansion, dep_extension, false, dep.constraint.clone(), path)
            {
                path.pop();
                return Err(err);
            }

            let entry_index = expansion.index[&id];
            if !expansion.entries[entry_index].deps.contains(&dep.id) {
                expansion.entries[entry_index].deps.push(dep.id.clone());
            }
        }

        path.pop();
        Ok(())
    }

    /// Pick the descriptor for `id` under `constraint`: a satisfying
    /// installed extension wins (exact namespace, then root), otherwise the
    /// repository backend decides.
    fn descriptor_for(
        &self,
        expansion: &Expansion<'_>,
        id: &str,
        constraint: &VersionConstraint,
    ) -> Result<Extension, ResolveError> {
        if let Some(installed) = expansion.graph.installed(&expansion.namespace, id) {
            if constraint.matches(&installed.extension.id.version) {
                return Ok(installed.extension);
            }
        }
        if !expansion.namespace.is_root() {
            if let Some(installed) = expansion.graph.installed(&Namespace::root(), id) {
                if constraint.matches(&installed.extension.id.version) {
                    return Ok(installed.extension);
                }
            }
        }
        self.repository.resolve(id, constraint)
    }

    /// Compare one desired entry against the installed state and emit the
    /// matching action.
    fn diff_entry(&self, expansion: &Expansion<'_>, entry: &DesiredEntry) -> ExtensionPlanAction {
        let namespace = &expansion.namespace;
        let id = &entry.extension.id.id;
        let desired_version = &entry.extension.id.version;

        let exact = expansion.graph.installed(namespace, id);
        let (installed, shadowed) = match exact {
            Some(installed) => (Some(installed), false),
            None if !namespace.is_root() => {
                (expansion.graph.installed(&Namespace::root(), id), true)
            }
            None => (None, false),
        };

        let (action, previous) = match installed {
            None => (ActionKind::Install, Vec::new()),
            Some(installed) => {
                let installed_version = &installed.extension.id.version;
                let kind = if installed_version < desired_version {
                    if shadowed && self.config.inheritance == InheritancePolicy::ShadowParent {
                        ActionKind::Install
                    } else {
                        ActionKind::Upgrade
                    }
                } else if installed_version > desired_version {
                    if shadowed && self.config.inheritance == InheritancePolicy::ShadowParent {
                        ActionKind::Install
                    } else {
                        ActionKind::Downgrade
                    }
                } else if shadowed {
                    match self.config.inheritance {
                        InheritancePolicy::ShadowParent => ActionKind::Install,
                        InheritancePolicy::RepairOnShadow => ActionKind::Repair,
                    }
                } else if !installed.valid {
                    ActionKind::Repair
                } else {
                    ActionKind::None
                };
                (kind, vec![installed])
            }
        };

        ExtensionPlanAction {
            extension: entry.extension.clone(),
            rewritten_extension: None,
            previous_extensions: previous,
            action,
            namespace: namespace.clone(),
            is_dependency: !entry.explicit,
        }
    }
}

/// Kahn's algorithm over the desired entries, dependency before dependent,
/// ties resolved by first-encounter order. The edge set is acyclic by
/// construction (cycle-closing edges are dropped during expansion).
fn forward_topological(entries: &[DesiredEntry], index: &HashMap<String, usize>) -> Vec<usize> {
    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for (entry_index, entry) in entries.iter().enumerate() {
        for dep in &entry.deps {
            if let Some(&dep_index) = index.get(dep) {
                dependents[dep_index].push(entry_index);
                in_degree[entry_index] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(entries.len());
    while let Some(Reverse(next)) = ready.pop() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }
    order
}

/// Order removed extensions so each dependent precedes its dependencies.
/// Installed-set cycles are broken by id order rather than looping.
fn reverse_topological(removed: &[InstalledExtension]) -> Vec<&InstalledExtension> {
    let index: HashMap<&str, usize> = removed
        .iter()
        .enumerate()
        .map(|(i, installed)| (installed.extension.id.id.as_str(), i))
        .collect();

    // Edge dependent -> dependency; emit dependents first.
    let mut in_degree = vec![0usize; removed.len()];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); removed.len()];
    for (dependent_index, installed) in removed.iter().enumerate() {
        for dep in &installed.extension.dependencies {
            if let Some(&dep_index) = index.get(dep.id.as_str()) {
                if dep_index != dependent_index {
                    consumers[dependent_index].push(dep_index);
                    in_degree[dep_index] += 1;
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(removed.len());
    let mut emitted = vec![false; removed.len()];
    while let Some(Reverse(next)) = ready.pop() {
        if emitted[next] {
            continue;
        }
        emitted[next] = true;
        order.push(&removed[next]);
        for &dep_index in &consumers[next] {
            in_degree[dep_index] = in_degree[dep_index].saturating_sub(1);
            if in_degree[dep_index] == 0 && !emitted[dep_index] {
                ready.push(Reverse(dep_index));
            }
        }
    }

    // Cycles among removed extensions: flush what remains in id order.
    for (i, installed) in removed.iter().enumerate() {
        if !emitted[i] {
            order.push(installed);
        }
    }
    order
}
