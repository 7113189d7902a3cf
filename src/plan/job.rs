//! The job that computes and executes an extension plan: resolve the target
//! state, optionally confirm interactively, then apply the actions.

use crate::error::JobError;
use crate::event::LogLevel;
use crate::extension::{ExtensionGraph, Namespace};
use crate::job::{Job, JobContext, JobGroupPath, Request};
use crate::plan::executor::{apply_rewriter, ExtensionRewriter, PlanExecutionReport, PlanExecutor};
use crate::plan::resolver::{PlanResolver, TargetExtension};
use crate::plan::ExtensionPlan;
use crate::registry::ComponentRegistry;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

pub const JOB_TYPE: &str = "extension/apply";

/// Request property that makes the job suspend on the computed plan and wait
/// for an external confirmation before applying it.
pub const PROP_INTERACTIVE: &str = "interactive";

/// Request property requesting a dedicated worker thread.
pub const PROP_ISOLATED: &str = "isolated";

/// Resolves the target extension state into a plan and executes it.
///
/// The computed plan is observable through [`ExtensionPlanJob::plan`] as soon
/// as resolution finishes, with exactly the ordering execution will use.
pub struct ExtensionPlanJob {
    request: Request,
    targets: Vec<TargetExtension>,
    resolver: Arc<PlanResolver>,
    executor: Arc<PlanExecutor>,
    registry: Arc<ComponentRegistry>,
    graph: Arc<ExtensionGraph>,
    computed_plan: RwLock<Option<ExtensionPlan>>,
    last_report: RwLock<Option<PlanExecutionReport>>,
}

impl ExtensionPlanJob {
    pub fn new(
        request: Request,
        targets: Vec<TargetExtension>,
        resolver: Arc<PlanResolver>,
        executor: Arc<PlanExecutor>,
        registry: Arc<ComponentRegistry>,
        graph: Arc<ExtensionGraph>,
    ) -> Self {
        Self {
            request,
            targets,
            resolver,
            executor,
            registry,
            graph,
            computed_plan: RwLock::new(None),
            last_report: RwLock::new(None),
        }
    }

    /// The resolved plan, available once resolution has run.
    pub fn plan(&self) -> Option<ExtensionPlan> {
        self.computed_plan.read().clone()
    }

    /// Per-action outcomes of the last execution.
    pub fn report(&self) -> Option<PlanExecutionReport> {
        self.last_report.read().clone()
    }

    fn bool_property(&self, key: &str) -> bool {
        self.request
            .property(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    async fn confirm_plan(&self, ctx: &JobContext, plan: &ExtensionPlan) -> Result<bool, JobError> {
        let question = serde_json::to_value(plan)
            .map_err(|err| JobError::Execution(format!("failed to encode plan: {err}")))?;
        let answer = ctx.ask(question).await?;
        Ok(answer
            .get("confirm")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }
}

#[async_trait]
impl Job for ExtensionPlanJob {
    fn job_type(&self) -> &str {
        JOB_TYPE
    }

    fn request(&self) -> &Request {
        &self.request
    }

    /// `extension/<namespace>` when every target addresses the same
    /// namespace, the broader `extension` group otherwise.
    fn group_path(&self) -> JobGroupPath {
        let mut namespaces: Vec<&Namespace> = Vec::new();
        for target in &self.targets {
            if !namespaces.contains(&&target.namespace) {
                namespaces.push(&target.namespace);
            }
        }
        match namespaces.as_slice() {
            [single] => JobGroupPath::new(vec!["extension".to_string(), single.to_string()]),
            _ => JobGroupPath::new(vec!["extension".to_string()]),
        }
    }

    fn isolated(&self) -> bool {
        self.bool_property(PROP_ISOLATED)
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        ctx.log(
            LogLevel::Info,
            format!("resolving plan for {} target(s)", self.targets.len()),
        );
        let plan = self.resolver.resolve(&self.targets, &self.graph)?;
        let plan = match self.registry.lookup_default::<dyn ExtensionRewriter>() {
            Some(rewriter) => apply_rewriter(&plan, rewriter.as_ref()),
            None => plan,
        };

        for cycle in plan.circular_dependencies() {
            ctx.log(
                LogLevel::Warn,
                format!("circular dependency: {}", cycle.chain.join(" -> ")),
            );
        }
        *self.computed_plan.write() = Some(plan.clone());

        if plan.is_noop() {
            ctx.log(LogLevel::Info, "already at target state, nothing to do");
            return Ok(());
        }

        if self.bool_property(PROP_INTERACTIVE) && !self.confirm_plan(&ctx, &plan).await? {
            ctx.log(LogLevel::Warn, "plan rejected by caller");
            return Err(JobError::Cancelled);
        }

        let report = self.executor.execute(&plan, &self.graph, &ctx)?;
        let total = report.outcomes.len();
        let failed = report.failed;
        let first = report.first_failure().map(|outcome| {
            format!("{} {}", outcome.action, outcome.extension)
        });
        *self.last_report.write() = Some(report);

        if failed > 0 {
            return Err(JobError::ExecutionFailed {
                failed,
                total,
                first: first.unwrap_or_default(),
            });
        }
        ctx.log(LogLevel::Info, "plan applied");
        Ok(())
    }
}
