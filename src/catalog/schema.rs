//! Data and parameter schema types used by node type contracts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::Params;

/// Structural shape of the data a node produces or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataShape {
    Dataframe,
    Signals,
    BacktestResults,
    Any,
}

impl DataShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataShape::Dataframe => "dataframe",
            DataShape::Signals => "signals",
            DataShape::BacktestResults => "backtest_results",
            DataShape::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dataframe" => Some(DataShape::Dataframe),
            "signals" => Some(DataShape::Signals),
            "backtest_results" => Some(DataShape::BacktestResults),
            "any" => Some(DataShape::Any),
            _ => None,
        }
    }

    /// Whether shapes carry tabular records with named columns.
    pub fn is_tabular(&self) -> bool {
        matches!(self, DataShape::Dataframe | DataShape::Signals)
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of a node's output.
///
/// `inherits_inputs` means the output also carries every column of the node's
/// tabular inputs. `open` means the column set cannot be known before running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    pub shape: DataShape,
    pub columns: Vec<String>,
    #[serde(default)]
    pub inherits_inputs: bool,
    #[serde(default)]
    pub open: bool,
}

impl DataSchema {
    pub fn new<I, S>(shape: DataShape, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shape,
            columns: columns.into_iter().map(Into::into).collect(),
            inherits_inputs: false,
            open: false,
        }
    }

    pub fn open(shape: DataShape) -> Self {
        Self {
            shape,
            columns: Vec::new(),
            inherits_inputs: false,
            open: true,
        }
    }

    pub fn inheriting(mut self) -> Self {
        self.inherits_inputs = true;
        self
    }
}

/// Declared kind of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    IntegerOrArray,
    Any,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::IntegerOrArray => value.is_i64() || value.is_u64() || value.is_array(),
            ParamKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::IntegerOrArray => "integer or array",
            ParamKind::Any => "any",
        }
    }
}

/// A named parameter with its declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Accepted dependency-count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const NONE: Arity = Arity {
        min: 0,
        max: Some(0),
    };

    pub fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub fn range(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    pub fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    /// Source nodes accept no dependencies at all.
    pub fn is_source(&self) -> bool {
        self.max == Some(0)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (0, Some(0)) => write!(f, "no dependencies"),
            (min, Some(max)) if min == max => write!(f, "exactly {}", min),
            (min, Some(max)) => write!(f, "between {} and {}", min, max),
            (min, None) => write!(f, "at least {}", min),
        }
    }
}

/// Columns a node needs to find across its tabular inputs.
#[derive(Debug, Clone)]
pub enum ColumnRequirement {
    None,
    Static(Vec<String>),
    Derived(fn(&Params) -> Vec<String>),
}

impl ColumnRequirement {
    pub fn of<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnRequirement::Static(columns.into_iter().map(Into::into).collect())
    }

    pub fn resolve(&self, params: &Params) -> Vec<String> {
        match self {
            ColumnRequirement::None => Vec::new(),
            ColumnRequirement::Static(cols) => cols.clone(),
            ColumnRequirement::Derived(f) => f(params),
        }
    }
}

/// A node type's declared input contract.
#[derive(Debug, Clone)]
pub struct InputContract {
    pub arity: Arity,
    pub accepted: Vec<DataShape>,
    pub required_columns: ColumnRequirement,
}

impl InputContract {
    pub fn source() -> Self {
        Self {
            arity: Arity::NONE,
            accepted: Vec::new(),
            required_columns: ColumnRequirement::None,
        }
    }

    pub fn new(arity: Arity, accepted: &[DataShape]) -> Self {
        Self {
            arity,
            accepted: accepted.to_vec(),
            required_columns: ColumnRequirement::None,
        }
    }

    pub fn requiring(mut self, columns: ColumnRequirement) -> Self {
        self.required_columns = columns;
        self
    }

    pub fn accepts(&self, produced: DataShape) -> bool {
        produced == DataShape::Any
            || self
                .accepted
                .iter()
                .any(|s| *s == DataShape::Any || *s == produced)
    }

    /// Resolve the contract against a node's own parameters.
    pub fn resolve(&self, params: &Params) -> InputSchema {
        InputSchema {
            arity: self.arity,
            accepted: self.accepted.clone(),
            required_columns: self.required_columns.resolve(params),
        }
    }
}

/// Serializable, parameter-resolved form of an [`InputContract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    pub arity: Arity,
    pub accepted: Vec<DataShape>,
    pub required_columns: Vec<String>,
}

/// Output schema as a pure function of a node's parameters.
#[derive(Debug, Clone)]
pub enum OutputSchemaResolver {
    Static(DataSchema),
    Derived(fn(&Params) -> DataSchema),
}

impl OutputSchemaResolver {
    pub fn resolve(&self, params: &Params) -> DataSchema {
        match self {
            OutputSchemaResolver::Static(schema) => schema.clone(),
            OutputSchemaResolver::Derived(f) => f(params),
        }
    }
}
