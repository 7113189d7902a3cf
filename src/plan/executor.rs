//! Plan executor: consumes a resolved plan in order, applying one action at
//! a time through registered action handlers.
//!
//! Every executable action gets a recorded outcome, so callers can tell
//! partial failure apart from the aggregate job error. Applied actions are
//! never rolled back: execution is at-least-once, not transactional.

use crate::error::JobError;
use crate::extension::{Extension, ExtensionGraph};
use crate::job::JobContext;
use crate::event::LogLevel;
use crate::plan::{ActionKind, ExtensionPlan, ExtensionPlanAction};
use crate::registry::ComponentRegistry;
use crate::version::ExtensionId;
use crate::extension::Namespace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies one kind of plan action against the extension graph. Looked up
/// from the component registry by the action kind's name.
pub trait ActionHandler: Send + Sync {
    fn apply(&self, action: &ExtensionPlanAction, graph: &ExtensionGraph) -> Result<(), JobError>;
}

/// Rewrites extension descriptors before execution (mirror redirection,
/// descriptor substitution). `None` keeps the descriptor verbatim.
pub trait ExtensionRewriter: Send + Sync {
    fn rewrite(&self, extension: &Extension) -> Option<Extension>;
}

/// Produce a plan whose actions carry rewritten descriptors. The input plan
/// is left untouched; ordering is preserved exactly.
pub fn apply_rewriter(plan: &ExtensionPlan, rewriter: &dyn ExtensionRewriter) -> ExtensionPlan {
    let actions = plan
        .actions()
        .iter()
        .map(|action| ExtensionPlanAction {
            rewritten_extension: rewriter.rewrite(&action.extension),
            ..action.clone()
        })
        .collect();
    ExtensionPlan::new(actions, plan.circular_dependencies().to_vec())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failed action stops the run; remaining actions are marked skipped.
    #[default]
    StopOnFailure,
    /// Keep going after failures and aggregate them in the report.
    Continue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionStatus {
    Applied,
    Failed { detail: String },
    Skipped,
}

/// Per-action execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub extension: ExtensionId,
    pub namespace: Namespace,
    pub action: ActionKind,
    pub status: ActionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanExecutionReport {
    pub outcomes: Vec<ActionOutcome>,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl PlanExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn first_failure(&self) -> Option<&ActionOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| matches!(outcome.status, ActionStatus::Failed { .. }))
    }
}

/// Executes plans action by action. Cancellation is observed cooperatively
/// before each action; graph mutation happens inside the handlers, under the
/// graph's namespace locks.
pub struct PlanExecutor {
    registry: Arc<ComponentRegistry>,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(registry: Arc<ComponentRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn execute(
        &self,
        plan: &ExtensionPlan,
        graph: &ExtensionGraph,
        ctx: &JobContext,
    ) -> Result<PlanExecutionReport, JobError> {
        let total = plan.executable_len();
        let mut report = PlanExecutionReport::default();
        let mut stopped = false;

        for action in plan.executable() {
            if stopped {
                report.skipped += 1;
                report.outcomes.push(outcome(action, ActionStatus::Skipped));
                continue;
            }

            ctx.check_cancelled()?;
            ctx.progress(
                format!("{} {}", action.action, action.extension.id),
                report.applied + report.failed,
                total,
            );

            let status = match self.apply_one(action, graph) {
                Ok(()) => {
                    report.applied += 1;
                    debug!(
                        action = %action.action,
                        extension = %action.extension.id,
                        namespace = %action.namespace,
                        "applied plan action"
                    );
                    ctx.log(
                        LogLevel::Info,
                        format!("{} {}", action.action, action.extension.id),
                    );
                    ActionStatus::Applied
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        action = %action.action,
                        extension = %action.extension.id,
                        error = %err,
                        "plan action failed"
                    );
                    ctx.log(
                        LogLevel::Error,
                        format!("{} {} failed: {err}", action.action, action.extension.id),
                    );
                    if self.config.failure_policy == FailurePolicy::StopOnFailure {
                        stopped = true;
                    }
                    ActionStatus::Failed {
                        detail: err.to_string(),
                    }
                }
            };
            report.outcomes.push(outcome(action, status));
        }

        ctx.progress(
            "plan execution finished",
            report.applied + report.failed,
            total,
        );
        Ok(report)
    }

    fn apply_one(
        &self,
        action: &ExtensionPlanAction,
        graph: &ExtensionGraph,
    ) -> Result<(), JobError> {
        let handler = self
            .registry
            .lookup_or_err::<dyn ActionHandler>(action.action.as_str())?;
        handler.apply(action, graph)
    }
}

fn outcome(action: &ExtensionPlanAction, status: ActionStatus) -> ActionOutcome {
    ActionOutcome {
        extension: action.extension.id.clone(),
        namespace: action.namespace.clone(),
        action: action.action,
        status,
    }
}

struct InstallHandler;

impl ActionHandler for InstallHandler {
    fn apply(&self, action: &ExtensionPlanAction, graph: &ExtensionGraph) -> Result<(), JobError> {
        graph.install(
            &action.namespace,
            action.effective_extension().clone(),
            action.is_dependency,
        );
        Ok(())
    }
}

/// Upgrades and downgrades both replace the installed record with the
/// desired descriptor.
struct ReplaceHandler;

impl ActionHandler for ReplaceHandler {
    fn apply(&self, action: &ExtensionPlanAction, graph: &ExtensionGraph) -> Result<(), JobError> {
        graph.install(
            &action.namespace,
            action.effective_extension().clone(),
            action.is_dependency,
        );
        Ok(())
    }
}

struct UninstallHandler;

impl ActionHandler for UninstallHandler {
    fn apply(&self, action: &ExtensionPlanAction, graph: &ExtensionGraph) -> Result<(), JobError> {
        let id = &action.extension.id;
        if graph.uninstall(&action.namespace, &id.id) {
            Ok(())
        } else {
            Err(JobError::ActionFailed {
                extension: id.to_string(),
                detail: format!("not installed in {}", action.namespace),
            })
        }
    }
}

struct RepairHandler;

impl ActionHandler for RepairHandler {
    fn apply(&self, action: &ExtensionPlanAction, graph: &ExtensionGraph) -> Result<(), JobError> {
        let id = &action.extension.id;
        if graph.set_valid(&action.namespace, &id.id, true) {
            Ok(())
        } else {
            // Repair of a shadowed parent install materializes the extension
            // in the target namespace.
            graph.install(
                &action.namespace,
                action.effective_extension().clone(),
                action.is_dependency,
            );
            Ok(())
        }
    }
}

/// Register the built-in graph-mutating handlers for every action kind.
pub fn register_default_handlers(registry: &ComponentRegistry) {
    registry.register::<dyn ActionHandler>(ActionKind::Install.as_str(), Arc::new(InstallHandler));
    registry.register::<dyn ActionHandler>(ActionKind::Upgrade.as_str(), Arc::new(ReplaceHandler));
    registry
        .register::<dyn ActionHandler>(ActionKind::Downgrade.as_str(), Arc::new(ReplaceHandler));
    registry
        .register::<dyn ActionHandler>(ActionKind::Uninstall.as_str(), Arc::new(UninstallHandler));
    registry.register::<dyn ActionHandler>(ActionKind::Repair.as_str(), Arc::new(RepairHandler));
}
