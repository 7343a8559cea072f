//! Pipeline-level error types.

use super::NodeError;
use crate::sandbox::SandboxError;
use thiserror::Error;

/// Pipeline-level errors.
///
/// Engine configuration errors (`NoRunner`, `InvalidPlan`) are defects in the
/// calling integration and are surfaced separately from per-node failures,
/// which live in each node's `ExecutionResult`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Compilation failed with {0} error(s)")]
    CompilationFailed(usize),
    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),
    #[error("No runner for node type: {node_type} (node {node_id})")]
    NoRunner { node_id: String, node_type: String },
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Run store error: {0}")]
    StoreError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Sandbox error: {0}")]
    SandboxError(Box<SandboxError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// True for errors caused by a miswired engine rather than by the pipeline's data.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PipelineError::NoRunner { .. } | PipelineError::InvalidPlan(_)
        )
    }
}

impl From<NodeError> for PipelineError {
    fn from(value: NodeError) -> Self {
        PipelineError::NodeError(Box::new(value))
    }
}

impl From<SandboxError> for PipelineError {
    fn from(value: SandboxError) -> Self {
        PipelineError::SandboxError(Box::new(value))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(value: serde_json::Error) -> Self {
        PipelineError::InternalError(value.to_string())
    }
}
