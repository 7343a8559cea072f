//! In-process runner for the builtin node types.

pub mod aggregate;
pub mod crossover;
pub mod frame;
pub mod indicator;
pub mod inline;

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::RuntimeKind;
use crate::core::ExecutionContext;
use crate::dsl::Params;
use crate::error::{NodeError, NodeResult};
use crate::nodes::runner::{ExecutionResult, NodeInvocation, Runner};

pub use frame::Frame;

/// Pure node logic over JSON frames.
pub trait BuiltinNode: Send + Sync {
    fn node_type(&self) -> &'static str;

    fn execute(&self, node_id: &str, params: &Params, inputs: &[Value]) -> NodeResult<Value>;
}

/// Dispatches builtin node types to their handlers.
pub struct BuiltinRunner {
    handlers: HashMap<&'static str, Box<dyn BuiltinNode>>,
}

impl BuiltinRunner {
    pub fn new() -> Self {
        let mut runner = Self {
            handlers: HashMap::new(),
        };
        runner.register(Box::new(inline::InlineDataNode));
        runner.register(Box::new(indicator::IndicatorNode));
        runner.register(Box::new(crossover::CrossoverSignalNode));
        runner.register(Box::new(aggregate::AggregateNode));
        runner
    }

    pub fn register(&mut self, handler: Box<dyn BuiltinNode>) {
        self.handlers.insert(handler.node_type(), handler);
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl Default for BuiltinRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for BuiltinRunner {
    fn name(&self) -> &str {
        "builtin"
    }

    fn runtime_kind(&self) -> RuntimeKind {
        RuntimeKind::Builtin
    }

    fn can_handle(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    async fn execute(&self, invocation: &NodeInvocation, context: &ExecutionContext) -> ExecutionResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        if context.is_cancelled() {
            return ExecutionResult::failure(&invocation.node_id, NodeError::Cancelled.to_string(), 0);
        }
        let Some(handler) = self.handlers.get(invocation.node_type.as_str()) else {
            return ExecutionResult::failure(
                &invocation.node_id,
                format!("no builtin handler for '{}'", invocation.node_type),
                0,
            );
        };

        let inputs: Vec<Value> = invocation.inputs.iter().map(|i| i.output.clone()).collect();
        match handler.execute(&invocation.node_id, &invocation.params, &inputs) {
            Ok(output) => ExecutionResult::success(&invocation.node_id, output, elapsed()),
            Err(err) => {
                tracing::debug!(
                    run_id = %context.run_id,
                    node_id = %invocation.node_id,
                    error = %err,
                    "builtin node failed"
                );
                ExecutionResult::failure(&invocation.node_id, err.to_string(), elapsed())
            }
        }
    }
}

/// The one tabular input of a single-input node.
pub(crate) fn single_input(node_id: &str, inputs: &[Value]) -> NodeResult<Frame> {
    match inputs {
        [only] => Frame::from_value(only),
        [] => Err(NodeError::InputError(format!("node {} requires an input", node_id))),
        _ => Err(NodeError::InputError(format!(
            "node {} takes exactly one input, got {}",
            node_id,
            inputs.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_runner_executes_handler() {
        let runner = BuiltinRunner::new();
        let ctx = ExecutionContext::new("p");
        let inv = NodeInvocation::new("src", "InlineDataNode", RuntimeKind::Builtin)
            .with_params(json!({"rows": [{"a": 1}]}).as_object().unwrap().clone());
        let result = runner.execute(&inv, &ctx).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output["data"][0]["a"], 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_failed_result() {
        let runner = BuiltinRunner::new();
        let ctx = ExecutionContext::new("p");
        let inv = NodeInvocation::new("sma", "IndicatorNode", RuntimeKind::Builtin)
            .with_params(json!({"indicator": "SMA", "period": 2}).as_object().unwrap().clone());
        let result = runner.execute(&inv, &ctx).await;
        assert!(!result.success);
        assert!(result.error_message().contains("requires an input"));
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let runner = BuiltinRunner::new();
        let ctx = ExecutionContext::new("p");
        ctx.cancel();
        let inv = NodeInvocation::new("src", "InlineDataNode", RuntimeKind::Builtin);
        let result = runner.execute(&inv, &ctx).await;
        assert!(!result.success);
        assert_eq!(result.error_message(), "Cancelled");
    }

    #[test]
    fn test_handles_builtin_types_only() {
        let runner = BuiltinRunner::new();
        assert_eq!(
            runner.registered_types(),
            vec!["AggregateNode", "CrossoverSignalNode", "IndicatorNode", "InlineDataNode"]
        );
        assert!(!runner.can_handle("BacktestNode"));
    }
}
