//! Node type catalog.
//!
//! Maps a node type name to its [`NodeTypeContract`]: runtime kind, parameter
//! specs, input contract, output schema resolver and per-type rule functions.
//! A catalog is built once at startup and then shared read-only (`Arc`) by the
//! compiler and the engine.

pub mod builtin;
pub mod resolve;
pub mod rules;
pub mod schema;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsl::{NodeDeclaration, ValidationError};
use crate::sandbox::custom::CustomNodeRegistry;

pub use resolve::SchemaResolver;
pub use schema::{
    Arity, ColumnRequirement, DataSchema, DataShape, InputContract, InputSchema,
    OutputSchemaResolver, ParamKind, ParamSpec,
};

/// A per-type semantic rule over a node's parameters.
pub type ParamRule = fn(&NodeDeclaration) -> Vec<ValidationError>;

/// Which backend executes a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Builtin,
    Python,
    #[serde(alias = "js")]
    JavaScript,
    Custom,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Builtin => "builtin",
            RuntimeKind::Python => "python",
            RuntimeKind::JavaScript => "javascript",
            RuntimeKind::Custom => "custom",
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        !matches!(self, RuntimeKind::Builtin)
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog entry describing one node type.
#[derive(Debug, Clone)]
pub struct NodeTypeContract {
    pub type_name: String,
    pub runtime: RuntimeKind,
    pub description: String,
    pub required_params: Vec<ParamSpec>,
    pub optional_params: Vec<ParamSpec>,
    pub input: InputContract,
    pub output: OutputSchemaResolver,
    pub rules: Vec<ParamRule>,
}

impl NodeTypeContract {
    pub fn new(type_name: impl Into<String>, runtime: RuntimeKind) -> Self {
        Self {
            type_name: type_name.into(),
            runtime,
            description: String::new(),
            required_params: Vec::new(),
            optional_params: Vec::new(),
            input: InputContract::source(),
            output: OutputSchemaResolver::Static(DataSchema::open(DataShape::Any)),
            rules: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self, name: &str, kind: ParamKind) -> Self {
        self.required_params.push(ParamSpec::new(name, kind));
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind) -> Self {
        self.optional_params.push(ParamSpec::new(name, kind));
        self
    }

    pub fn input(mut self, input: InputContract) -> Self {
        self.input = input;
        self
    }

    pub fn output(mut self, output: OutputSchemaResolver) -> Self {
        self.output = output;
        self
    }

    pub fn rule(mut self, rule: ParamRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn param_spec(&self, name: &str) -> Option<&ParamSpec> {
        self.required_params
            .iter()
            .chain(self.optional_params.iter())
            .find(|p| p.name == name)
    }

    pub fn is_source(&self) -> bool {
        self.input.arity.is_source()
    }
}

/// Registry of node type contracts.
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    contracts: HashMap<String, Arc<NodeTypeContract>>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding every platform-provided node type.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for contract in builtin::contracts() {
            catalog.register(contract);
        }
        catalog
    }

    /// Register (or replace) a contract.
    pub fn register(&mut self, contract: NodeTypeContract) {
        self.contracts
            .insert(contract.type_name.clone(), Arc::new(contract));
    }

    /// Add a contract for every user-authored node the registry currently knows.
    ///
    /// Returns the number of contracts added.
    pub fn register_custom(&mut self, registry: &CustomNodeRegistry) -> usize {
        let mut added = 0;
        for definition in registry.definitions() {
            if self.contracts.contains_key(&definition.node_type) {
                tracing::warn!(
                    node_type = %definition.node_type,
                    "custom node shadows an existing node type, skipping"
                );
                continue;
            }
            self.register(definition.to_contract());
            added += 1;
        }
        added
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<NodeTypeContract>> {
        self.contracts.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.contracts.contains_key(type_name)
    }

    pub fn runtime_of(&self, type_name: &str) -> Option<RuntimeKind> {
        self.contracts.get(type_name).map(|c| c.runtime)
    }

    /// Sorted list of every registered type name.
    pub fn known_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.contracts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}
