use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use xpipeline_types::{GuestLanguage, SandboxOutput};

use super::error::SandboxError;
use super::lifecycle::{SandboxLifecycle, SandboxRun};
use super::types::{EntryPoint, SandboxRequest};
use crate::catalog::{NodeCatalog, RuntimeKind};
use crate::core::execution_context::DATASET_PARAM;
use crate::core::ExecutionContext;
use crate::nodes::runner::{ExecutionResult, NodeInvocation, Runner};

/// Parameter carrying user-authored guest code.
pub const CODE_PARAM: &str = "code";

/// Executes catalog node types of one sandboxed runtime in isolated units.
pub struct SandboxedRunner {
    runtime: RuntimeKind,
    language: GuestLanguage,
    catalog: Arc<NodeCatalog>,
    lifecycle: Arc<SandboxLifecycle>,
}

impl SandboxedRunner {
    pub fn python(catalog: Arc<NodeCatalog>, lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self {
            runtime: RuntimeKind::Python,
            language: GuestLanguage::Python,
            catalog,
            lifecycle,
        }
    }

    pub fn javascript(catalog: Arc<NodeCatalog>, lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self {
            runtime: RuntimeKind::JavaScript,
            language: GuestLanguage::JavaScript,
            catalog,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &Arc<SandboxLifecycle> {
        &self.lifecycle
    }

    fn entry_for(&self, invocation: &NodeInvocation) -> EntryPoint {
        let takes_code = self
            .catalog
            .get(&invocation.node_type)
            .map_or(false, |c| c.param_spec(CODE_PARAM).is_some());
        match invocation.params.get(CODE_PARAM).and_then(Value::as_str) {
            Some(code) if takes_code => EntryPoint::Inline(code.to_string()),
            _ => EntryPoint::Catalog(format!(
                "{}.{}",
                invocation.node_type,
                script_extension(self.language)
            )),
        }
    }
}

#[async_trait]
impl Runner for SandboxedRunner {
    fn name(&self) -> &str {
        self.language.as_str()
    }

    fn runtime_kind(&self) -> RuntimeKind {
        self.runtime
    }

    fn can_handle(&self, node_type: &str) -> bool {
        self.catalog.runtime_of(node_type) == Some(self.runtime)
    }

    async fn execute(&self, invocation: &NodeInvocation, context: &ExecutionContext) -> ExecutionResult {
        let entry = self.entry_for(invocation);
        let mut request = SandboxRequest::new(
            &invocation.node_id,
            &invocation.node_type,
            self.language,
            entry,
        );
        request.params = invocation.params.clone();
        request.inputs = invocation.inputs_map();
        match dataset_bindings(invocation, context) {
            Ok(datasets) => request.datasets = datasets,
            Err(message) => return ExecutionResult::failure(&invocation.node_id, message, 0),
        }
        let started = Instant::now();
        let outcome = self.lifecycle.run(request, context).await;
        into_result(&invocation.node_id, &context.run_id, outcome, started)
    }

    async fn cancel(&self, run_id: &str) {
        let stopped = self.lifecycle.cancel_run(run_id);
        if stopped > 0 {
            tracing::info!(run_id, units = stopped, runner = self.name(), "cancelled sandbox units");
        }
    }
}

pub(crate) fn script_extension(language: GuestLanguage) -> &'static str {
    match language {
        GuestLanguage::Python => "py",
        GuestLanguage::JavaScript => "js",
    }
}

/// Host paths for the datasets a node names.
pub(crate) fn dataset_bindings(
    invocation: &NodeInvocation,
    context: &ExecutionContext,
) -> Result<BTreeMap<String, std::path::PathBuf>, String> {
    let mut datasets = BTreeMap::new();
    if let Some(name) = invocation.params.get(DATASET_PARAM).and_then(Value::as_str) {
        let path = context
            .dataset(name)
            .ok_or_else(|| format!("dataset '{}' is not bound for this run", name))?;
        datasets.insert(name.to_string(), path.to_path_buf());
    }
    Ok(datasets)
}

/// Map a lifecycle outcome onto the runner result contract.
pub(crate) fn into_result(
    node_id: &str,
    run_id: &str,
    outcome: Result<SandboxRun, SandboxError>,
    started: Instant,
) -> ExecutionResult {
    let elapsed = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(run) => match run.output {
            SandboxOutput::Success { result, stats, logs } => {
                ExecutionResult::success(node_id, result, run.elapsed_ms)
                    .with_logs(logs)
                    .with_stats(stats)
            }
            SandboxOutput::Failure {
                error,
                violation,
                logs,
            } => {
                // Callers match on the kind name in the error text.
                let error = match &violation {
                    Some(v) if !error.contains(v.kind.as_str()) => format!("{}: {}", v.kind, error),
                    _ => error,
                };
                let mut result = ExecutionResult::failure(node_id, error, run.elapsed_ms).with_logs(logs);
                if let Some(violation) = violation {
                    tracing::warn!(
                        run_id,
                        node_id,
                        unit = %run.unit,
                        violation = %violation.kind,
                        "sandbox violation"
                    );
                    result = result.with_violation(violation);
                }
                result
            }
        },
        Err(SandboxError::Cancelled) => ExecutionResult::failure(node_id, "Cancelled", elapsed),
        Err(err) => ExecutionResult::failure(node_id, err.to_string(), elapsed),
    }
}
