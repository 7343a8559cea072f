//! Runs a compiled pipeline: every node after its dependencies, independent
//! branches concurrently, first failure stops the run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use super::event_bus::{EventSender, PipelineEvent};
use super::execution_context::ExecutionContext;
use crate::compiler::{CompiledPipeline, IrNode};
use crate::error::PipelineError;
use crate::graph::DependencyGraph;
use crate::infrastructure::RunStore;
use crate::nodes::runner::{ExecutionResult, NodeInput, NodeInvocation, Runner, RunnerSet};

/// How long in-flight nodes get to observe cancellation before their tasks are aborted.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Configuration for the execution engine, the `[engine]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock ceiling for a whole run; 0 disables it.
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: u64,
    #[serde(default = "default_parallel_enabled")]
    pub parallel_enabled: bool,
    /// Upper bound on concurrently running nodes; 0 means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_max_execution_time_secs() -> u64 {
    600
}

fn default_parallel_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_execution_time_secs: default_max_execution_time_secs(),
            parallel_enabled: true,
            max_concurrency: 0,
        }
    }
}

impl EngineConfig {
    fn effective_concurrency(&self) -> usize {
        match (self.parallel_enabled, self.max_concurrency) {
            (false, _) => 1,
            (true, 0) => usize::MAX,
            (true, n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Final state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    /// Results of every node that finished, keyed by node id.
    pub results: BTreeMap<String, ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_time_ms: u64,
}

impl RunResult {
    pub fn result(&self, node_id: &str) -> Option<&ExecutionResult> {
        self.results.get(node_id)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Why the scheduling loop stopped early.
enum Halt {
    Failed(String),
    Cancelled,
}

pub struct PipelineExecutor {
    plan: Arc<CompiledPipeline>,
    runners: RunnerSet,
    config: EngineConfig,
    event_sender: Option<EventSender>,
    run_store: Option<Arc<dyn RunStore>>,
    status: Mutex<RunStatus>,
}

impl PipelineExecutor {
    pub fn new(plan: Arc<CompiledPipeline>, runners: RunnerSet, config: EngineConfig) -> Self {
        Self {
            plan,
            runners,
            config,
            event_sender: None,
            run_store: None,
            status: Mutex::new(RunStatus::Pending),
        }
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn with_run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock()
    }

    pub fn plan(&self) -> &Arc<CompiledPipeline> {
        &self.plan
    }

    /// Execute the plan.
    ///
    /// Returns `Err` only when the run cannot start (invalid plan, a node type
    /// without a runner). Node failures and cancellation produce a `RunResult`.
    pub async fn run(&self, context: Arc<ExecutionContext>) -> Result<RunResult, PipelineError> {
        let started = Instant::now();
        self.check_plan()?;
        let assignments = self.assign_runners()?;

        let run_id = context.run_id.clone();
        *self.status.lock() = RunStatus::Running;
        tracing::info!(
            run_id = %run_id,
            pipeline_id = %self.plan.id,
            nodes = self.plan.nodes.len(),
            "run started"
        );
        self.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            pipeline_id: self.plan.id.clone(),
            timestamp: chrono::Utc::now(),
        });

        // Fail-fast cancels this token without touching the caller's.
        let run_ctx = Arc::new(context.child());
        let results: DashMap<String, ExecutionResult> = DashMap::new();
        let nodes: HashMap<&str, &IrNode> = self.plan.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut pending: Vec<&IrNode> = self
            .plan
            .execution_order
            .iter()
            .filter_map(|id| nodes.get(id.as_str()).copied())
            .collect();

        let max_concurrency = self.config.effective_concurrency();
        let deadline = (self.config.max_execution_time_secs > 0).then(|| {
            tokio::time::Instant::now() + Duration::from_secs(self.config.max_execution_time_secs)
        });

        let mut join_set: JoinSet<(String, ExecutionResult)> = JoinSet::new();
        let mut halt: Option<Halt> = None;

        loop {
            if context.is_cancelled() {
                halt = Some(Halt::Cancelled);
                break;
            }

            let mut i = 0;
            while i < pending.len() && join_set.len() < max_concurrency {
                let node = pending[i];
                if !dependencies_succeeded(node, &results) {
                    i += 1;
                    continue;
                }
                pending.remove(i);
                let runner = assignments[node.id.as_str()].clone();
                let invocation = invocation_for(node, &results);
                self.emit(PipelineEvent::NodeStarted {
                    run_id: run_id.clone(),
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    runner: runner.name().to_string(),
                    timestamp: chrono::Utc::now(),
                });
                tracing::info!(
                    run_id = %run_id,
                    node_id = %node.id,
                    node_type = %node.node_type,
                    runner = runner.name(),
                    "node started"
                );
                let task_ctx = run_ctx.clone();
                join_set.spawn(async move {
                    let result = runner.execute(&invocation, &task_ctx).await;
                    (invocation.node_id, result)
                });
            }

            if join_set.is_empty() {
                if !pending.is_empty() {
                    let stalled: Vec<&str> = pending.iter().map(|n| n.id.as_str()).collect();
                    halt = Some(Halt::Failed(format!(
                        "no runnable nodes left; waiting on [{}]",
                        stalled.join(", ")
                    )));
                }
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = context.cancelled() => {
                    halt = Some(Halt::Cancelled);
                    break;
                }
                _ = sleep_until(deadline) => {
                    halt = Some(Halt::Failed(format!(
                        "run exceeded max_execution_time_secs ({}s)",
                        self.config.max_execution_time_secs
                    )));
                    break;
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                continue;
            };

            match joined {
                Ok((node_id, result)) => {
                    let failed = (!result.success).then(|| result.error_message().to_string());
                    self.record(&run_id, &results, result).await;
                    if let Some(error) = failed {
                        halt = Some(Halt::Failed(format!("node '{}' failed: {}", node_id, error)));
                        break;
                    }
                }
                Err(join_error) => {
                    halt = Some(Halt::Failed(format!("node task join error: {}", join_error)));
                    break;
                }
            }
        }

        if halt.is_some() && !join_set.is_empty() {
            run_ctx.cancel();
            self.runners.cancel_run(&run_id).await;
            self.drain(&run_id, &mut join_set, &results).await;
        }

        let (status, error) = match halt {
            None => (RunStatus::Completed, None),
            Some(Halt::Cancelled) => (RunStatus::Cancelled, Some("run cancelled".to_string())),
            Some(Halt::Failed(error)) => (RunStatus::Failed, Some(error)),
        };
        *self.status.lock() = status;

        let result = RunResult {
            run_id: run_id.clone(),
            pipeline_id: self.plan.id.clone(),
            status,
            results: results.into_iter().collect(),
            error,
            total_time_ms: started.elapsed().as_millis() as u64,
        };
        match status {
            RunStatus::Completed => {
                tracing::info!(run_id = %run_id, total_time_ms = result.total_time_ms, "run completed")
            }
            _ => tracing::warn!(
                run_id = %run_id,
                status = ?status,
                error = result.error.as_deref().unwrap_or_default(),
                "run did not complete"
            ),
        }
        if let Some(store) = &self.run_store {
            if let Err(err) = store.record_run(&result).await {
                tracing::warn!(run_id = %run_id, error = %err, "failed to store run result");
            }
        }
        self.emit(PipelineEvent::RunFinished {
            run_id,
            status,
            total_time_ms: result.total_time_ms,
            timestamp: chrono::Utc::now(),
        });
        Ok(result)
    }

    /// Wait for in-flight nodes after a halt. Only successful completions are
    /// kept; anything still running after the grace period is aborted.
    async fn drain(
        &self,
        run_id: &str,
        join_set: &mut JoinSet<(String, ExecutionResult)>,
        results: &DashMap<String, ExecutionResult>,
    ) {
        let graceful = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(joined) = join_set.join_next().await {
                if let Ok((_, result)) = joined {
                    if result.success {
                        self.record(run_id, results, result).await;
                    }
                }
            }
        })
        .await;
        if graceful.is_err() {
            tracing::warn!(run_id, remaining = join_set.len(), "aborting nodes that ignored cancellation");
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
        }
    }

    /// Store a result unless one already exists for the node.
    async fn record(&self, run_id: &str, results: &DashMap<String, ExecutionResult>, result: ExecutionResult) {
        let node_id = result.node_id.clone();
        if result.success {
            tracing::info!(run_id, node_id = %node_id, elapsed_ms = result.execution_time_ms, "node succeeded");
            self.emit(PipelineEvent::NodeSucceeded {
                run_id: run_id.to_string(),
                node_id: node_id.clone(),
                execution_time_ms: result.execution_time_ms,
                timestamp: chrono::Utc::now(),
            });
        } else {
            tracing::warn!(run_id, node_id = %node_id, error = result.error_message(), "node failed");
            self.emit(PipelineEvent::NodeFailed {
                run_id: run_id.to_string(),
                node_id: node_id.clone(),
                error: result.error_message().to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        if let Some(store) = &self.run_store {
            if let Err(err) = store.record_node(run_id, &result).await {
                tracing::warn!(run_id, node_id = %node_id, error = %err, "failed to store node result");
            }
        }
        match results.entry(node_id) {
            Entry::Occupied(existing) => {
                tracing::warn!(run_id, node_id = %existing.key(), "duplicate result ignored");
            }
            Entry::Vacant(slot) => {
                slot.insert(result);
            }
        }
    }

    /// Execution order must be a dependency-respecting permutation of the nodes.
    fn check_plan(&self) -> Result<(), PipelineError> {
        let ids: Vec<String> = self.plan.nodes.iter().map(|n| n.id.clone()).collect();
        for node in &self.plan.nodes {
            if let Some(dep) = node.metadata.depends_on.iter().find(|d| !ids.contains(d)) {
                return Err(PipelineError::InvalidPlan(format!(
                    "node '{}' depends on unknown node '{}'",
                    node.id, dep
                )));
            }
        }
        let graph = DependencyGraph::from_parts(
            ids.iter().cloned(),
            self.plan.nodes.iter().flat_map(|n| {
                n.metadata
                    .depends_on
                    .iter()
                    .map(move |dep| (dep.clone(), n.id.clone()))
            }),
        );
        if graph.len() != self.plan.nodes.len() {
            return Err(PipelineError::InvalidPlan("duplicate node ids".to_string()));
        }
        graph
            .check_order(&self.plan.execution_order)
            .map_err(PipelineError::InvalidPlan)
    }

    fn assign_runners(&self) -> Result<HashMap<&str, Arc<dyn Runner>>, PipelineError> {
        self.plan
            .nodes
            .iter()
            .map(|node| {
                self.runners
                    .select(&node.node_type)
                    .map(|runner| (node.id.as_str(), runner))
                    .ok_or_else(|| PipelineError::NoRunner {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                    })
            })
            .collect()
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }
}

fn dependencies_succeeded(node: &IrNode, results: &DashMap<String, ExecutionResult>) -> bool {
    node.metadata
        .depends_on
        .iter()
        .all(|dep| results.get(dep).map_or(false, |r| r.success))
}

fn invocation_for(node: &IrNode, results: &DashMap<String, ExecutionResult>) -> NodeInvocation {
    let mut seen = HashSet::new();
    NodeInvocation {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        runtime: node.runtime,
        params: node.parameters.clone(),
        inputs: node
            .metadata
            .depends_on
            .iter()
            .filter(|dep| seen.insert(dep.as_str()))
            .filter_map(|dep| {
                results.get(dep).map(|r| NodeInput {
                    node_id: dep.clone(),
                    output: r.output.clone(),
                })
            })
            .collect(),
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Arity, DataShape, InputContract, NodeCatalog, NodeTypeContract, ParamKind, RuntimeKind};
    use crate::compiler::PipelineCompiler;
    use crate::dsl::DslFormat;
    use crate::infrastructure::MemoryRunStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> Arc<NodeCatalog> {
        let mut catalog = NodeCatalog::new();
        catalog.register(
            NodeTypeContract::new("Stub", RuntimeKind::Builtin)
                .optional("delay_ms", ParamKind::Integer)
                .optional("fail", ParamKind::Boolean)
                .input(InputContract::new(Arity::at_least(0), &[DataShape::Any])),
        );
        catalog.register(NodeTypeContract::new("Orphan", RuntimeKind::Python));
        Arc::new(catalog)
    }

    fn plan(yaml: &str) -> Arc<CompiledPipeline> {
        Arc::new(PipelineCompiler::new(catalog()).compile(yaml, DslFormat::Yaml).unwrap())
    }

    #[derive(Default)]
    struct Recorder {
        current: AtomicUsize,
        max_seen: AtomicUsize,
        executed: Mutex<Vec<String>>,
    }

    struct StubRunner {
        recorder: Arc<Recorder>,
    }

    #[async_trait]
    impl Runner for StubRunner {
        fn name(&self) -> &str {
            "stub"
        }
        fn runtime_kind(&self) -> RuntimeKind {
            RuntimeKind::Builtin
        }
        fn can_handle(&self, node_type: &str) -> bool {
            node_type == "Stub"
        }
        async fn execute(&self, inv: &NodeInvocation, ctx: &ExecutionContext) -> ExecutionResult {
            let active = self.recorder.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.recorder.max_seen.fetch_max(active, Ordering::SeqCst);
            self.recorder.executed.lock().push(inv.node_id.clone());
            let delay = inv.params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            let result = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                    if inv.params.get("fail").and_then(Value::as_bool).unwrap_or(false) {
                        ExecutionResult::failure(&inv.node_id, "stub failure", delay)
                    } else {
                        let inputs: Vec<&str> = inv.inputs.iter().map(|i| i.node_id.as_str()).collect();
                        ExecutionResult::success(&inv.node_id, json!({"inputs": inputs}), delay)
                    }
                }
                _ = ctx.cancelled() => ExecutionResult::failure(&inv.node_id, "Cancelled", 0),
            };
            self.recorder.current.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn executor(plan: Arc<CompiledPipeline>, config: EngineConfig) -> (PipelineExecutor, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let runners = RunnerSet::new().with(Arc::new(StubRunner { recorder: recorder.clone() }));
        (PipelineExecutor::new(plan, runners, config), recorder)
    }

    const DIAMOND: &str = r#"
- {id: A, type: Stub, params: {delay_ms: 10}}
- {id: B, type: Stub, depends_on: [A], params: {delay_ms: 50}}
- {id: C, type: Stub, depends_on: [A], params: {delay_ms: 50}}
- {id: D, type: Stub, depends_on: [B, C], params: {}}
"#;

    #[test]
    fn test_invocation_passes_each_upstream_once() {
        let plan = plan(DIAMOND);
        let mut d = plan.node("D").unwrap().clone();
        d.metadata.depends_on = vec!["B".into(), "C".into(), "B".into()];
        let results = DashMap::new();
        for id in ["B", "C"] {
            results.insert(id.to_string(), ExecutionResult::success(id, json!({"from": id}), 0));
        }
        let inv = invocation_for(&d, &results);
        let inputs: Vec<&str> = inv.inputs.iter().map(|i| i.node_id.as_str()).collect();
        assert_eq!(inputs, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order_with_parallel_branches() {
        let (exec, recorder) = executor(plan(DIAMOND), EngineConfig::default());
        let result = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(exec.status(), RunStatus::Completed);
        assert_eq!(result.results.len(), 4);
        assert_eq!(result.results["D"].output, json!({"inputs": ["B", "C"]}));
        let executed = recorder.executed.lock().clone();
        assert_eq!(executed[0], "A");
        assert_eq!(executed[3], "D");
        assert!(recorder.max_seen.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_sequential_when_parallel_disabled() {
        let config = EngineConfig {
            parallel_enabled: false,
            ..Default::default()
        };
        let (exec, recorder) = executor(plan(DIAMOND), config);
        let result = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap();
        assert!(result.is_success());
        assert_eq!(recorder.max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.executed.lock(), vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_first_failure_stops_scheduling() {
        let yaml = r#"
- {id: A, type: Stub, params: {}}
- {id: B, type: Stub, depends_on: [A], params: {fail: true}}
- {id: C, type: Stub, depends_on: [A], params: {delay_ms: 5000}}
- {id: D, type: Stub, depends_on: [B], params: {}}
"#;
        let (exec, recorder) = executor(plan(yaml), EngineConfig::default());
        let result = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("node 'B' failed"));
        assert!(result.results["A"].success);
        assert!(!result.results["B"].success);
        assert!(!result.results.contains_key("C"));
        assert!(!result.results.contains_key("D"));
        assert!(!recorder.executed.lock().contains(&"D".to_string()));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_completed_results() {
        let yaml = r#"
- {id: A, type: Stub, params: {}}
- {id: B, type: Stub, depends_on: [A], params: {delay_ms: 5000}}
"#;
        let (exec, _recorder) = executor(plan(yaml), EngineConfig::default());
        let (tx, mut rx) = super::super::event_bus::create_event_channel();
        let exec = exec.with_event_sender(tx);
        let ctx = Arc::new(ExecutionContext::new("p"));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let PipelineEvent::NodeSucceeded { node_id, .. } = event {
                    if node_id == "A" {
                        canceller.cancel();
                    }
                }
            }
        });
        let result = exec.run(ctx).await.unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.results["A"].success);
        assert!(!result.results.contains_key("B"));
    }

    #[tokio::test]
    async fn test_missing_runner_is_fatal_before_work() {
        let yaml = r#"
- {id: A, type: Stub, params: {}}
- {id: X, type: Orphan, params: {}}
"#;
        let (exec, recorder) = executor(plan(yaml), EngineConfig::default());
        let err = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoRunner { ref node_id, .. } if node_id == "X"));
        assert!(recorder.executed.lock().is_empty());
        assert_eq!(exec.status(), RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_rejects_bad_execution_order() {
        let mut bad = (*plan(DIAMOND)).clone();
        bad.execution_order.swap(0, 3);
        let (exec, _) = executor(Arc::new(bad), EngineConfig::default());
        let err = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_run_ceiling() {
        let yaml = "- {id: A, type: Stub, params: {delay_ms: 5000}}\n";
        let config = EngineConfig {
            max_execution_time_secs: 1,
            ..Default::default()
        };
        let (exec, _) = executor(plan(yaml), config);
        let result = exec.run(Arc::new(ExecutionContext::new("p"))).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.unwrap().contains("max_execution_time_secs"));
    }

    #[tokio::test]
    async fn test_run_store_receives_results() {
        let store = Arc::new(MemoryRunStore::new());
        let (exec, _) = executor(plan(DIAMOND), EngineConfig::default());
        let exec = exec.with_run_store(store.clone());
        let ctx = Arc::new(ExecutionContext::new("p").with_run_id("run-42"));
        exec.run(ctx).await.unwrap();
        assert_eq!(store.node_results("run-42").await.unwrap().len(), 4);
        assert!(store.load_run("run-42").await.unwrap().unwrap().is_success());
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_execution_time_secs, 600);
        assert!(config.parallel_enabled);
        assert_eq!(config.max_concurrency, 0);
    }
}
