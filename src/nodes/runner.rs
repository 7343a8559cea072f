use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xpipeline_types::{ResourceStats, SandboxViolation};

use crate::catalog::RuntimeKind;
use crate::core::ExecutionContext;
use crate::dsl::Params;

/// Output of one upstream node, handed to a dependent.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub node_id: String,
    pub output: Value,
}

/// Everything a runner needs to execute one node.
#[derive(Debug, Clone)]
pub struct NodeInvocation {
    pub node_id: String,
    pub node_type: String,
    pub runtime: RuntimeKind,
    pub params: Params,
    /// Upstream outputs, in `depends_on` order.
    pub inputs: Vec<NodeInput>,
}

impl NodeInvocation {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, runtime: RuntimeKind) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            runtime,
            params: Params::new(),
            inputs: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_input(mut self, node_id: impl Into<String>, output: Value) -> Self {
        self.inputs.push(NodeInput {
            node_id: node_id.into(),
            output,
        });
        self
    }

    /// Inputs keyed by producer id, the shape sandboxed node scripts read.
    pub fn inputs_map(&self) -> serde_json::Map<String, Value> {
        self.inputs
            .iter()
            .map(|input| (input.node_id.clone(), input.output.clone()))
            .collect()
    }
}

/// Outcome of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub node_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<SandboxViolation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_stats: Option<ResourceStats>,
}

impl ExecutionResult {
    pub fn success(node_id: impl Into<String>, output: Value, execution_time_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            success: true,
            output,
            error: None,
            violation: None,
            logs: Vec::new(),
            execution_time_ms,
            resource_stats: None,
        }
    }

    pub fn failure(node_id: impl Into<String>, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            node_id: node_id.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            violation: None,
            logs: Vec::new(),
            execution_time_ms,
            resource_stats: None,
        }
    }

    pub fn with_violation(mut self, violation: SandboxViolation) -> Self {
        self.violation = Some(violation);
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_stats(mut self, stats: Option<ResourceStats>) -> Self {
        self.resource_stats = stats;
        self
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// An execution backend for a set of node types.
///
/// `execute` never returns `Err`: every failure, including guest violations
/// and missing entry points, is reported as an unsuccessful result.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    fn runtime_kind(&self) -> RuntimeKind;

    fn can_handle(&self, node_type: &str) -> bool;

    async fn execute(&self, invocation: &NodeInvocation, context: &ExecutionContext) -> ExecutionResult;

    /// Stop every unit this runner started for `run_id`.
    async fn cancel(&self, _run_id: &str) {}
}

/// Ordered dispatch table; the first capable runner wins.
#[derive(Clone, Default)]
pub struct RunnerSet {
    runners: Vec<Arc<dyn Runner>>,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, runner: Arc<dyn Runner>) -> Self {
        self.push(runner);
        self
    }

    pub fn push(&mut self, runner: Arc<dyn Runner>) {
        self.runners.push(runner);
    }

    pub fn select(&self, node_type: &str) -> Option<Arc<dyn Runner>> {
        self.runners
            .iter()
            .find(|runner| runner.can_handle(node_type))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.name()).collect()
    }

    pub async fn cancel_run(&self, run_id: &str) {
        futures::future::join_all(self.runners.iter().map(|runner| runner.cancel(run_id))).await;
    }
}

impl std::fmt::Debug for RunnerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSet")
            .field("runners", &self.names())
            .finish()
    }
}
