//! # xpipeline: compiler and sandboxed executor for declarative pipelines
//!
//! A pipeline is a list of typed nodes with `depends_on` edges, written in
//! YAML, JSON or TOML. The crate covers both halves of its life:
//!
//! - **Compilation**: parsing, three validation layers (structure, parameters,
//!   data compatibility), dependency ordering with cycle reporting, and lowering
//!   to a self-contained [`CompiledPipeline`] IR.
//! - **Execution**: a concurrent, fail-fast [`PipelineExecutor`] that dispatches
//!   each node to a [`Runner`]: in-process builtins, or Python, JavaScript and
//!   user-authored nodes run in an isolated sandbox unit (child process or
//!   container) under the guest harness from `xpipeline-guest`.
//!
//! Validation never throws: every diagnostic is collected into a
//! [`ValidationReport`] with a stable code (`E001`...).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xpipeline::{DslFormat, ExecutionContext, PipelineRuntime, XPipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = PipelineRuntime::from_config(XPipelineConfig::default())?;
//!     let source = std::fs::read_to_string("pipeline.yaml")?;
//!     let plan = runtime.compiler().compile(&source, DslFormat::Yaml)?;
//!     let context = ExecutionContext::new(plan.id.clone());
//!     let result = runtime.run(Arc::new(plan), context, None).await?;
//!     println!("{:?}", result.status);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod compiler;
pub mod config;
pub mod core;
pub mod dsl;
pub mod error;
pub mod graph;
pub mod infrastructure;
pub mod nodes;
pub mod runtime;
pub mod sandbox;

pub use crate::catalog::{DataShape, NodeCatalog, NodeTypeContract, RuntimeKind};
pub use crate::compiler::{CompileFailure, CompiledPipeline, IrNode, PipelineCompiler};
pub use crate::config::XPipelineConfig;
pub use crate::core::{
    create_event_channel, EngineConfig, ExecutionContext, PipelineEvent, PipelineExecutor, RunResult,
    RunStatus,
};
pub use crate::dsl::{parse_pipeline, DslFormat, PipelineDocument, ValidationError, ValidationReport};
pub use crate::error::{NodeError, PipelineError};
pub use crate::graph::DependencyGraph;
pub use crate::nodes::{ExecutionResult, NodeInvocation, Runner, RunnerSet};
pub use crate::runtime::PipelineRuntime;
pub use crate::sandbox::{SandboxConfig, SandboxLifecycle, SandboxMode};
pub use xpipeline_types::{SandboxViolation, SecurityPolicy, ViolationKind};
