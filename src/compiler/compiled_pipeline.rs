//! The serializable intermediate representation produced by the compiler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{DataSchema, DataShape, InputSchema, RuntimeKind};
use crate::dsl::Params;

/// Execution-ready pipeline plan.
///
/// Invariant: `execution_order` is a permutation of the node ids that places
/// every dependency before its dependents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledPipeline {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    pub metadata: PipelineMetadata,
    pub nodes: Vec<IrNode>,
    pub dependencies: Vec<IrDependency>,
    pub execution_order: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetadata {
    pub compiled_at: DateTime<Utc>,
    pub total_nodes: usize,
    pub has_circular_dependencies: bool,
    #[serde(default)]
    pub source_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub runtime: RuntimeKind,
    pub parameters: Params,
    pub input_schema: InputSchema,
    pub output_schema: DataSchema,
    pub metadata: IrNodeMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrNodeMetadata {
    pub declaration_index: usize,
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A typed data edge from producer to consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrDependency {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub data_type: DataShape,
}

impl CompiledPipeline {
    pub fn node(&self, id: &str) -> Option<&IrNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Dependencies of `id`, in the order they were declared.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.node(id)
            .map(|n| n.metadata.depends_on.as_slice())
            .unwrap_or(&[])
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}
