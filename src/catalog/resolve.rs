//! Transitive output schema resolution across a pipeline.

use std::collections::{HashMap, HashSet};

use crate::dsl::{NodeDeclaration, PipelineDocument};

use super::schema::{DataSchema, DataShape};
use super::NodeCatalog;

/// Resolves each node's effective output schema, expanding `inherits_inputs`
/// through the node's tabular dependencies. Results are memoised per node.
pub struct SchemaResolver<'a> {
    catalog: &'a NodeCatalog,
    nodes: HashMap<&'a str, &'a NodeDeclaration>,
    cache: HashMap<String, DataSchema>,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(doc: &'a PipelineDocument, catalog: &'a NodeCatalog) -> Self {
        Self::from_nodes(&doc.nodes, catalog)
    }

    pub fn from_nodes(nodes: &'a [NodeDeclaration], catalog: &'a NodeCatalog) -> Self {
        Self {
            catalog,
            nodes: nodes.iter().map(|n| (n.id.as_str(), n)).collect(),
            cache: HashMap::new(),
        }
    }

    /// Effective output schema of `node_id`.
    ///
    /// Unknown nodes, unknown types and nodes on a dependency cycle resolve to
    /// an open `any` schema so callers never have to special-case them.
    pub fn resolve(&mut self, node_id: &str) -> DataSchema {
        let mut visiting = HashSet::new();
        self.resolve_inner(node_id, &mut visiting)
    }

    fn resolve_inner(&mut self, node_id: &str, visiting: &mut HashSet<String>) -> DataSchema {
        if let Some(cached) = self.cache.get(node_id) {
            return cached.clone();
        }
        let Some(node) = self.nodes.get(node_id).copied() else {
            return DataSchema::open(DataShape::Any);
        };
        let Some(contract) = self.catalog.get(&node.node_type) else {
            return DataSchema::open(DataShape::Any);
        };
        if !visiting.insert(node_id.to_string()) {
            return DataSchema::open(DataShape::Any);
        }

        let own = contract.output.resolve(&node.parameters);
        let resolved = if own.inherits_inputs {
            let mut columns: Vec<String> = Vec::new();
            let mut open = own.open;
            for dep in node.dependencies() {
                let upstream = self.resolve_inner(dep, visiting);
                if upstream.open {
                    open = true;
                }
                if upstream.shape.is_tabular() || upstream.shape == DataShape::Any {
                    for col in upstream.columns {
                        if !columns.contains(&col) {
                            columns.push(col);
                        }
                    }
                }
            }
            for col in own.columns {
                if !columns.contains(&col) {
                    columns.push(col);
                }
            }
            DataSchema {
                shape: own.shape,
                columns,
                inherits_inputs: false,
                open,
            }
        } else {
            own
        };

        visiting.remove(node_id);
        self.cache.insert(node_id.to_string(), resolved.clone());
        resolved
    }
}
