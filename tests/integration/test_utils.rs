//! Shared test utilities for integration tests
//!
//! Provides a closure-driven job implementation and fixture builders for the
//! plan resolution pipeline, so individual tests stay focused on behavior.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tessera::error::JobError;
use tessera::extension::repository::MemoryExtensionRepository;
use tessera::extension::{Extension, ExtensionDependency, ExtensionGraph, Namespace};
use tessera::job::{Job, JobContext, JobGroupPath, Request};
use tessera::plan::executor::{register_default_handlers, PlanExecutor};
use tessera::plan::resolver::{PlanResolver, TargetExtension};
use tessera::registry::ComponentRegistry;
use tessera::version::{ExtensionId, Version, VersionConstraint};

/// A job whose body is a closure, for exercising the scheduler without a
/// real workload.
pub struct FnJob {
    job_type: String,
    request: Request,
    path: JobGroupPath,
    isolated: bool,
    body: Box<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>,
}

impl FnJob {
    pub fn new(
        path: &[&str],
        body: impl Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_type: "test".to_string(),
            request: Request::default(),
            path: JobGroupPath::new(path.iter().copied()),
            isolated: false,
            body: Box::new(body),
        })
    }

    pub fn with_request(
        path: &[&str],
        request: Request,
        body: impl Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_type: "test".to_string(),
            request,
            path: JobGroupPath::new(path.iter().copied()),
            isolated: false,
            body: Box::new(body),
        })
    }

    pub fn isolated(
        path: &[&str],
        body: impl Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            job_type: "test-isolated".to_string(),
            request: Request::default(),
            path: JobGroupPath::new(path.iter().copied()),
            isolated: true,
            body: Box::new(body),
        })
    }
}

#[async_trait]
impl Job for FnJob {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn request(&self) -> &Request {
        &self.request
    }

    fn group_path(&self) -> JobGroupPath {
        self.path.clone()
    }

    fn isolated(&self) -> bool {
        self.isolated
    }

    async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
        (self.body)(ctx).await
    }
}

/// Everything needed to resolve and execute plans against a fresh graph.
pub struct PlanHarness {
    pub resolver: Arc<PlanResolver>,
    pub executor: Arc<PlanExecutor>,
    pub registry: Arc<ComponentRegistry>,
    pub graph: Arc<ExtensionGraph>,
}

pub fn plan_harness(extensions: Vec<Extension>) -> PlanHarness {
    let repo = MemoryExtensionRepository::new();
    for extension in extensions {
        repo.register(extension);
    }
    let registry = Arc::new(ComponentRegistry::new());
    register_default_handlers(&registry);
    PlanHarness {
        resolver: Arc::new(PlanResolver::new(Arc::new(repo))),
        executor: Arc::new(PlanExecutor::new(Arc::clone(&registry))),
        registry,
        graph: Arc::new(ExtensionGraph::new()),
    }
}

/// Extension descriptor with `>=` dependencies.
pub fn ext(id: &str, version: &str, deps: &[(&str, &str)]) -> Extension {
    Extension::with_dependencies(
        ExtensionId::new(id, version),
        deps.iter()
            .map(|(dep, minimum)| {
                ExtensionDependency::new(
                    *dep,
                    VersionConstraint::AtLeast(Version::new(*minimum)),
                )
            })
            .collect(),
    )
}

pub fn target(id: &str, version: &str, namespace: &Namespace) -> TargetExtension {
    TargetExtension::new(ExtensionId::new(id, version), namespace.clone())
}
