//! Error types for the pipeline compiler and engine.
//!
//! - [`NodeError`] - Errors raised inside builtin node logic.
//! - [`PipelineError`] - Top-level errors for compilation plumbing and engine configuration.
//!
//! Compilation diagnostics are not errors in this sense: they are collected as
//! [`crate::dsl::ValidationError`] values and returned in a report.

pub mod node_error;
pub mod pipeline_error;

pub use node_error::NodeError;
pub use pipeline_error::PipelineError;

/// Convenience alias for pipeline-level results.
pub type PipelineResult<T> = Result<T, PipelineError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
