//! Tabular payload exchanged between nodes: `{type, data: [records], metadata}`.

use serde_json::{Map, Value};

use crate::catalog::DataShape;
use crate::error::{NodeError, NodeResult};

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub shape: DataShape,
    pub rows: Vec<Record>,
    pub metadata: Map<String, Value>,
}

impl Frame {
    pub fn new(shape: DataShape, rows: Vec<Record>) -> Self {
        Self {
            shape,
            rows,
            metadata: Map::new(),
        }
    }

    /// Read a frame from an upstream output. A bare array of records is
    /// accepted as a dataframe.
    pub fn from_value(value: &Value) -> NodeResult<Self> {
        match value {
            Value::Array(items) => Ok(Self::new(DataShape::Dataframe, records(items)?)),
            Value::Object(obj) => {
                let data = obj
                    .get("data")
                    .and_then(Value::as_array)
                    .ok_or_else(|| NodeError::InputError("input has no 'data' records".to_string()))?;
                let shape = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(DataShape::parse)
                    .unwrap_or(DataShape::Dataframe);
                let mut frame = Self::new(shape, records(data)?);
                if let Some(Value::Object(meta)) = obj.get("metadata") {
                    frame.metadata = meta.clone();
                }
                Ok(frame)
            }
            other => Err(NodeError::InputError(format!(
                "expected a dataframe, got {}",
                kind_name(other)
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut metadata = self.metadata.clone();
        metadata.insert("rows".into(), Value::from(self.rows.len()));
        metadata.insert("columns".into(), Value::from(self.columns()));
        serde_json::json!({
            "type": self.shape.as_str(),
            "data": self.rows,
            "metadata": metadata,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.rows.iter().any(|row| row.contains_key(column))
    }

    pub fn require_column(&self, node_id: &str, column: &str) -> NodeResult<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(NodeError::MissingColumn {
                node_id: node_id.to_string(),
                column: column.to_string(),
            })
        }
    }

    pub fn column_f64(&self, column: &str) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|row| row.get(column).and_then(as_number))
            .collect()
    }

    /// Write a numeric column; `None` and non-finite values become `null`.
    pub fn set_column(&mut self, column: &str, values: &[Option<f64>]) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            let json = value
                .filter(|v| v.is_finite())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            row.insert(column.to_string(), json);
        }
    }

    /// Inner-join frames on `key`. Columns of earlier frames win on clashes;
    /// row order follows the first frame.
    pub fn merge_on(frames: &[Frame], key: &str) -> NodeResult<Frame> {
        let Some((first, rest)) = frames.split_first() else {
            return Err(NodeError::InputError("no input frames".to_string()));
        };
        let mut merged = first.clone();
        for other in rest {
            if !other.has_column(key) {
                return Err(NodeError::InputError(format!(
                    "all inputs must have a '{}' column",
                    key
                )));
            }
            merged.rows = merged
                .rows
                .into_iter()
                .filter_map(|mut row| {
                    let joined = row.get(key).and_then(|k| other.rows.iter().find(|r| r.get(key) == Some(k)))?;
                    for (column, value) in joined {
                        row.entry(column.clone()).or_insert_with(|| value.clone());
                    }
                    Some(row)
                })
                .collect();
        }
        Ok(merged)
    }
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn records(items: &[Value]) -> NodeResult<Vec<Record>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(obj) => Ok(obj.clone()),
            other => Err(NodeError::InputError(format!(
                "record {} is {}, expected an object",
                i,
                kind_name(other)
            ))),
        })
        .collect()
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
