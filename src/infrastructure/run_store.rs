use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;

use crate::core::RunResult;
use crate::error::PipelineError;
use crate::nodes::ExecutionResult;

/// Receives every node result as it lands and the final run result.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn record_node(&self, run_id: &str, result: &ExecutionResult) -> Result<(), PipelineError>;

    async fn record_run(&self, result: &RunResult) -> Result<(), PipelineError>;

    async fn node_results(&self, run_id: &str) -> Result<Vec<ExecutionResult>, PipelineError>;

    async fn load_run(&self, run_id: &str) -> Result<Option<RunResult>, PipelineError>;
}

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    nodes: DashMap<String, Vec<ExecutionResult>>,
    runs: DashMap<String, RunResult>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn record_node(&self, run_id: &str, result: &ExecutionResult) -> Result<(), PipelineError> {
        self.nodes
            .entry(run_id.to_string())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    async fn record_run(&self, result: &RunResult) -> Result<(), PipelineError> {
        self.runs.insert(result.run_id.clone(), result.clone());
        Ok(())
    }

    async fn node_results(&self, run_id: &str) -> Result<Vec<ExecutionResult>, PipelineError> {
        Ok(self
            .nodes
            .get(run_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunResult>, PipelineError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }
}

/// One directory per store: `<run>.nodes.jsonl` plus `<run>.json`.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn nodes_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.nodes.jsonl", run_id))
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

fn store_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::StoreError(e.to_string())
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn record_node(&self, run_id: &str, result: &ExecutionResult) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(store_error)?;
        let mut line = serde_json::to_vec(result).map_err(store_error)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.nodes_path(run_id))
            .await
            .map_err(store_error)?;
        file.write_all(&line).await.map_err(store_error)?;
        file.flush().await.map_err(store_error)
    }

    async fn record_run(&self, result: &RunResult) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(store_error)?;
        let bytes = serde_json::to_vec_pretty(result).map_err(store_error)?;
        tokio::fs::write(self.run_path(&result.run_id), bytes)
            .await
            .map_err(store_error)
    }

    async fn node_results(&self, run_id: &str) -> Result<Vec<ExecutionResult>, PipelineError> {
        let content = match tokio::fs::read_to_string(self.nodes_path(run_id)).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_error(e)),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(store_error))
            .collect()
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunResult>, PipelineError> {
        match tokio::fs::read(self.run_path(run_id)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(store_error),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }
}
