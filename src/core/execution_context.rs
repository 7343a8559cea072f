use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::compiler::CompiledPipeline;
use crate::error::PipelineError;
use crate::infrastructure::DatasetProvider;

/// Parameter that names a dataset a node reads.
pub const DATASET_PARAM: &str = "dataset";

/// Per-run state shared (as `Arc`) by the engine and every runner.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: String,
    pub pipeline_id: String,
    /// Dataset name to resolved host path.
    pub dataset_bindings: HashMap<String, PathBuf>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.into(),
            dataset_bindings: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_dataset(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.dataset_bindings.insert(name.into(), path.into());
        self
    }

    /// Request cancellation of the run. Idempotent.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    /// Same run, with a cancellation token that is cancelled when this one is
    /// but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            run_id: self.run_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            dataset_bindings: self.dataset_bindings.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn dataset(&self, name: &str) -> Option<&Path> {
        self.dataset_bindings.get(name).map(PathBuf::as_path)
    }

    /// Resolve every `dataset` parameter in the plan through `provider`.
    pub async fn bind_datasets(
        &mut self,
        plan: &CompiledPipeline,
        provider: &dyn DatasetProvider,
    ) -> Result<(), PipelineError> {
        for node in &plan.nodes {
            let Some(name) = node.parameters.get(DATASET_PARAM).and_then(|v| v.as_str()) else {
                continue;
            };
            if self.dataset_bindings.contains_key(name) {
                continue;
            }
            let path = provider.resolve(name).await?;
            tracing::debug!(
                run_id = %self.run_id,
                node_id = %node.id,
                dataset = name,
                path = %path.display(),
                "dataset bound"
            );
            self.dataset_bindings.insert(name.to_string(), path);
        }
        Ok(())
    }
}
