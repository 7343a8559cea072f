//! Wires the catalog, compiler, runners and sandbox together from a config.

use std::sync::Arc;

use crate::catalog::NodeCatalog;
use crate::compiler::{CompiledPipeline, PipelineCompiler};
use crate::config::XPipelineConfig;
use crate::core::{EventSender, ExecutionContext, PipelineExecutor, RunResult};
use crate::error::PipelineError;
use crate::infrastructure::{FileRunStore, LocalDatasetProvider, MemoryRunStore, RunStore};
use crate::nodes::{BuiltinRunner, RunnerSet};
use crate::sandbox::{CustomNodeRegistry, CustomRunner, SandboxLifecycle, SandboxedRunner};

pub struct PipelineRuntime {
    config: XPipelineConfig,
    catalog: Arc<NodeCatalog>,
    compiler: PipelineCompiler,
    runners: RunnerSet,
    lifecycle: Arc<SandboxLifecycle>,
    datasets: LocalDatasetProvider,
    run_store: Arc<dyn RunStore>,
}

impl PipelineRuntime {
    /// Build the runtime: builtin catalog plus any custom nodes found under
    /// `paths.custom_nodes_dir`, one runner per backend.
    pub fn from_config(config: XPipelineConfig) -> Result<Self, PipelineError> {
        let registry = Arc::new(CustomNodeRegistry::new());
        if let Some(dir) = &config.paths.custom_nodes_dir {
            let found = registry.discover(dir)?;
            tracing::info!(dir = %dir.display(), found, "custom nodes discovered");
        }

        let mut catalog = NodeCatalog::with_builtins();
        catalog.register_custom(&registry);
        let catalog = Arc::new(catalog);

        let mut lifecycle = SandboxLifecycle::from_config(config.sandbox.clone(), config.security.clone());
        for (key, value) in config.sandbox_env() {
            lifecycle = lifecycle.with_env(key, value);
        }
        let lifecycle = Arc::new(lifecycle);

        let runners = RunnerSet::new()
            .with(Arc::new(BuiltinRunner::new()))
            .with(Arc::new(SandboxedRunner::python(catalog.clone(), lifecycle.clone())))
            .with(Arc::new(SandboxedRunner::javascript(catalog.clone(), lifecycle.clone())))
            .with(Arc::new(CustomRunner::new(registry, lifecycle.clone())));

        let run_store: Arc<dyn RunStore> = match &config.paths.runs_dir {
            Some(dir) => Arc::new(FileRunStore::new(dir.clone())),
            None => Arc::new(MemoryRunStore::new()),
        };

        tracing::debug!(
            node_types = catalog.len(),
            runners = ?runners.names(),
            launcher = lifecycle.launcher_name(),
            "runtime ready"
        );
        Ok(Self {
            compiler: PipelineCompiler::new(catalog.clone()),
            datasets: LocalDatasetProvider::new(config.paths.datasets_dir.clone()),
            config,
            catalog,
            runners,
            lifecycle,
            run_store,
        })
    }

    pub fn config(&self) -> &XPipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<NodeCatalog> {
        &self.catalog
    }

    pub fn compiler(&self) -> &PipelineCompiler {
        &self.compiler
    }

    pub fn runners(&self) -> &RunnerSet {
        &self.runners
    }

    pub fn lifecycle(&self) -> &Arc<SandboxLifecycle> {
        &self.lifecycle
    }

    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.run_store
    }

    /// Bind the plan's datasets into `context` and execute it.
    pub async fn run(
        &self,
        plan: Arc<CompiledPipeline>,
        mut context: ExecutionContext,
        events: Option<EventSender>,
    ) -> Result<RunResult, PipelineError> {
        context.bind_datasets(&plan, &self.datasets).await?;
        let mut executor = PipelineExecutor::new(plan, self.runners.clone(), self.config.engine.clone())
            .with_run_store(self.run_store.clone());
        if let Some(sender) = events {
            executor = executor.with_event_sender(sender);
        }
        executor.run(Arc::new(context)).await
    }
}
