//! Node types contributed at deploy time from `*/node.json` manifests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xpipeline_types::GuestLanguage;

use super::lifecycle::SandboxLifecycle;
use super::runner::{dataset_bindings, into_result};
use super::types::{EntryPoint, SandboxRequest};
use crate::catalog::{
    Arity, ColumnRequirement, DataSchema, DataShape, InputContract, NodeTypeContract,
    OutputSchemaResolver, ParamSpec, RuntimeKind,
};
use crate::core::ExecutionContext;
use crate::error::PipelineError;
use crate::nodes::runner::{ExecutionResult, NodeInvocation, Runner};

pub const MANIFEST_FILE: &str = "node.json";

fn default_language() -> GuestLanguage {
    GuestLanguage::Python
}

/// Declared inputs of a custom node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInput {
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
    #[serde(default)]
    pub accepted: Vec<DataShape>,
    #[serde(default)]
    pub required_columns: Vec<String>,
}

/// One `node.json` manifest plus the directory it was found in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomNodeDefinition {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_language")]
    pub runtime: GuestLanguage,
    pub entry: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_params: Vec<ParamSpec>,
    #[serde(default)]
    pub optional_params: Vec<ParamSpec>,
    #[serde(default)]
    pub input: Option<ManifestInput>,
    #[serde(default)]
    pub output: Option<DataSchema>,
    #[serde(skip)]
    pub dir: PathBuf,
}

impl CustomNodeDefinition {
    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }

    pub fn to_contract(&self) -> NodeTypeContract {
        let mut contract = NodeTypeContract::new(&self.node_type, RuntimeKind::Custom)
            .describe(self.description.clone());
        contract.required_params = self.required_params.clone();
        contract.optional_params = self.optional_params.clone();
        if let Some(input) = &self.input {
            let accepted = if input.accepted.is_empty() {
                vec![DataShape::Any]
            } else {
                input.accepted.clone()
            };
            contract = contract.input(
                InputContract::new(
                    Arity {
                        min: input.min,
                        max: input.max,
                    },
                    &accepted,
                )
                .requiring(if input.required_columns.is_empty() {
                    ColumnRequirement::None
                } else {
                    ColumnRequirement::of(input.required_columns.iter().cloned())
                }),
            );
        }
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| DataSchema::open(DataShape::Any));
        contract.output(OutputSchemaResolver::Static(output))
    }
}

/// Read-mostly registry of custom node definitions.
#[derive(Debug, Default)]
pub struct CustomNodeRegistry {
    nodes: RwLock<HashMap<String, Arc<CustomNodeDefinition>>>,
}

impl CustomNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: CustomNodeDefinition) {
        self.nodes
            .write()
            .insert(definition.node_type.clone(), Arc::new(definition));
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<CustomNodeDefinition>> {
        self.nodes.read().get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.nodes.read().contains_key(node_type)
    }

    /// Definitions sorted by type name.
    pub fn definitions(&self) -> Vec<Arc<CustomNodeDefinition>> {
        let mut defs: Vec<_> = self.nodes.read().values().cloned().collect();
        defs.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        defs
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Load every `<dir>/*/node.json`. Unreadable manifests are skipped with a
    /// warning; returns how many definitions were registered.
    pub fn discover(&self, dir: &Path) -> Result<usize, PipelineError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            PipelineError::ConfigError(format!(
                "cannot read custom nodes directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        let mut loaded = 0;
        for entry in entries.flatten() {
            let node_dir = entry.path();
            let manifest = node_dir.join(MANIFEST_FILE);
            if !manifest.is_file() {
                continue;
            }
            match load_manifest(&manifest) {
                Ok(mut definition) => {
                    definition.dir = node_dir;
                    tracing::info!(node_type = %definition.node_type, "custom node discovered");
                    self.register(definition);
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(manifest = %manifest.display(), error = %err, "skipping custom node");
                }
            }
        }
        Ok(loaded)
    }
}

fn load_manifest(path: &Path) -> Result<CustomNodeDefinition, PipelineError> {
    let content = std::fs::read_to_string(path)?;
    let definition: CustomNodeDefinition = serde_json::from_str(&content)
        .map_err(|e| PipelineError::ConfigError(format!("invalid manifest: {}", e)))?;
    if definition.node_type.trim().is_empty() || definition.entry.trim().is_empty() {
        return Err(PipelineError::ConfigError(
            "manifest needs a non-empty 'type' and 'entry'".to_string(),
        ));
    }
    if Path::new(&definition.entry).is_absolute() || definition.entry.contains("..") {
        return Err(PipelineError::ConfigError(format!(
            "entry '{}' must be a relative path inside the node directory",
            definition.entry
        )));
    }
    Ok(definition)
}

/// Runs custom node types; the entry point is resolved on every call.
pub struct CustomRunner {
    registry: Arc<CustomNodeRegistry>,
    lifecycle: Arc<SandboxLifecycle>,
}

impl CustomRunner {
    pub fn new(registry: Arc<CustomNodeRegistry>, lifecycle: Arc<SandboxLifecycle>) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }
}

#[async_trait]
impl Runner for CustomRunner {
    fn name(&self) -> &str {
        "custom"
    }

    fn runtime_kind(&self) -> RuntimeKind {
        RuntimeKind::Custom
    }

    fn can_handle(&self, node_type: &str) -> bool {
        self.registry.contains(node_type)
    }

    async fn execute(&self, invocation: &NodeInvocation, context: &ExecutionContext) -> ExecutionResult {
        let node_id = &invocation.node_id;
        let Some(definition) = self.registry.get(&invocation.node_type) else {
            return ExecutionResult::failure(
                node_id,
                format!("custom node type '{}' is not available", invocation.node_type),
                0,
            );
        };
        let entry = definition.entry_path();
        if !entry.is_file() {
            return ExecutionResult::failure(
                node_id,
                format!(
                    "entry point {} for custom node type '{}' not found",
                    entry.display(),
                    definition.node_type
                ),
                0,
            );
        }

        let mut request = SandboxRequest::new(
            node_id,
            &invocation.node_type,
            definition.runtime,
            EntryPoint::File {
                dir: definition.dir.clone(),
                file: definition.entry.clone(),
            },
        );
        request.params = invocation.params.clone();
        request.inputs = invocation.inputs_map();
        request.scan_entry = true;
        match dataset_bindings(invocation, context) {
            Ok(datasets) => request.datasets = datasets,
            Err(message) => return ExecutionResult::failure(node_id, message, 0),
        }

        let started = Instant::now();
        let outcome = self.lifecycle.run(request, context).await;
        into_result(node_id, &context.run_id, outcome, started)
    }

    async fn cancel(&self, run_id: &str) {
        self.lifecycle.cancel_run(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NodeCatalog;
    use crate::sandbox::SandboxConfig;
    use xpipeline_types::SecurityPolicy;

    fn write_node(root: &Path, name: &str, manifest: &str, entry: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        if let Some(file) = entry {
            std::fs::write(dir.join(file), "print('hi')").unwrap();
        }
    }

    const MANIFEST: &str = r#"{
        "type": "VolatilityNode",
        "runtime": "python",
        "entry": "main.py",
        "description": "Rolling volatility",
        "requiredParams": [{"name": "window", "kind": "integer"}],
        "input": {"min": 1, "max": 1, "accepted": ["dataframe"], "requiredColumns": ["close"]},
        "output": {"shape": "dataframe", "columns": ["volatility"], "inheritsInputs": true}
    }"#;

    #[test]
    fn test_discover_and_register_in_catalog() {
        let root = tempfile::tempdir().unwrap();
        write_node(root.path(), "vol", MANIFEST, Some("main.py"));
        write_node(root.path(), "broken", "{not json", None);
        std::fs::create_dir_all(root.path().join("empty")).unwrap();

        let registry = CustomNodeRegistry::new();
        assert_eq!(registry.discover(root.path()).unwrap(), 1);
        let def = registry.get("VolatilityNode").unwrap();
        assert_eq!(def.runtime, GuestLanguage::Python);
        assert!(def.entry_path().ends_with("vol/main.py"));

        let mut catalog = NodeCatalog::with_builtins();
        assert_eq!(catalog.register_custom(&registry), 1);
        let contract = catalog.get("VolatilityNode").unwrap();
        assert_eq!(contract.runtime, RuntimeKind::Custom);
        assert_eq!(contract.input.arity, Arity::exactly(1));
        assert!(contract.param_spec("window").is_some());
    }

    #[test]
    fn test_manifest_rejects_escaping_entry() {
        let root = tempfile::tempdir().unwrap();
        write_node(
            root.path(),
            "evil",
            r#"{"type": "EvilNode", "entry": "../../etc/passwd"}"#,
            None,
        );
        let registry = CustomNodeRegistry::new();
        assert_eq!(registry.discover(root.path()).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_entry_is_failed_result() {
        let root = tempfile::tempdir().unwrap();
        write_node(root.path(), "vol", MANIFEST, None);
        let registry = Arc::new(CustomNodeRegistry::new());
        registry.discover(root.path()).unwrap();
        let lifecycle = Arc::new(SandboxLifecycle::from_config(
            SandboxConfig::default(),
            SecurityPolicy::default(),
        ));
        let runner = CustomRunner::new(registry, lifecycle);
        assert!(runner.can_handle("VolatilityNode"));

        let ctx = ExecutionContext::new("p");
        let inv = NodeInvocation::new("v", "VolatilityNode", RuntimeKind::Custom);
        let result = runner.execute(&inv, &ctx).await;
        assert!(!result.success);
        assert!(result.error_message().contains("not found"));

        let inv = NodeInvocation::new("x", "GoneNode", RuntimeKind::Custom);
        let result = runner.execute(&inv, &ctx).await;
        assert!(result.error_message().contains("not available"));
    }
}
