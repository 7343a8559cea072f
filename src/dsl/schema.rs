//! Parsed pipeline document types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter map of a node declaration.
pub type Params = Map<String, Value>;

/// A parsed pipeline source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDocument {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub nodes: Vec<NodeDeclaration>,
}

/// One node entry, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeclaration {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl NodeDeclaration {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            parameters: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// `depends_on` without repeats, in first-listed order. Every consumer
    /// of the edges goes through this; only validation looks at the raw list.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.depends_on
            .iter()
            .map(String::as_str)
            .filter(|dep| seen.insert(*dep))
            .collect()
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(Value::as_i64)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }
}

impl PipelineDocument {
    pub fn from_nodes(nodes: Vec<NodeDeclaration>) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDeclaration> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
