//! Installation plan model: the ordered reconciliation actions produced by
//! the resolver and consumed by the executor.

use crate::extension::{Extension, InstalledExtension, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub mod executor;
pub mod job;
pub mod resolver;

pub use executor::{
    ActionHandler, ActionOutcome, ActionStatus, ExecutorConfig, FailurePolicy, PlanExecutionReport,
    PlanExecutor,
};
pub use job::ExtensionPlanJob;
pub use resolver::{InheritancePolicy, PlanResolver, ResolverConfig, TargetExtension};

/// One reconciliation step for one extension in one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Already installed at the desired version; kept in the plan for
    /// ordering, omitted from execution.
    None,
    Install,
    Upgrade,
    Downgrade,
    Uninstall,
    Repair,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::None => "none",
            ActionKind::Install => "install",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Downgrade => "downgrade",
            ActionKind::Uninstall => "uninstall",
            ActionKind::Repair => "repair",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single plan action. Produced by the resolver, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPlanAction {
    pub extension: Extension,
    /// Descriptor after rewriting (mirror redirection etc.), when a rewriter
    /// is registered. `None` means `extension` is used verbatim.
    #[serde(default)]
    pub rewritten_extension: Option<Extension>,
    /// Installed extensions this action supersedes (same id in this
    /// namespace, or the ancestor-namespace install being shadowed).
    pub previous_extensions: Vec<InstalledExtension>,
    pub action: ActionKind,
    pub namespace: Namespace,
    /// True when the extension is in the plan only because something else in
    /// the desired set required it.
    pub is_dependency: bool,
}

impl ExtensionPlanAction {
    /// The descriptor the executor should act on.
    pub fn effective_extension(&self) -> &Extension {
        self.rewritten_extension.as_ref().unwrap_or(&self.extension)
    }
}

/// A dependency chain that returned to an id already being expanded. Recorded
/// on the plan as a marker, never a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularDependency {
    pub namespace: Namespace,
    /// The chain of ids, ending with the id that closed the cycle.
    pub chain: Vec<String>,
}

/// Ordered reconciliation plan: per-namespace action sequences merged
/// preserving each namespace's internal order.
///
/// The plan is enumerable before execution (dry-run preview); execution
/// consumes the exact same ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPlan {
    actions: Vec<ExtensionPlanAction>,
    #[serde(default)]
    circular_dependencies: Vec<CircularDependency>,
}

impl ExtensionPlan {
    pub fn new(
        actions: Vec<ExtensionPlanAction>,
        circular_dependencies: Vec<CircularDependency>,
    ) -> Self {
        Self {
            actions,
            circular_dependencies,
        }
    }

    /// Every action, NONE entries included, in execution order.
    pub fn actions(&self) -> &[ExtensionPlanAction] {
        &self.actions
    }

    /// Actions that will actually execute (NONE entries skipped).
    pub fn executable(&self) -> impl Iterator<Item = &ExtensionPlanAction> {
        self.actions
            .iter()
            .filter(|action| action.action != ActionKind::None)
    }

    pub fn executable_len(&self) -> usize {
        self.executable().count()
    }

    /// True when nothing needs to change.
    pub fn is_noop(&self) -> bool {
        self.executable_len() == 0
    }

    pub fn circular_dependencies(&self) -> &[CircularDependency] {
        &self.circular_dependencies
    }

    /// Namespaces touched by this plan, in first-appearance order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let mut seen = HashSet::new();
        self.actions
            .iter()
            .filter(|action| seen.insert(action.namespace.clone()))
            .map(|action| action.namespace.clone())
            .collect()
    }
}
