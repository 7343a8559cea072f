use serde_json::{Map, Value};

use super::frame::Frame;
use super::BuiltinNode;
use crate::catalog::DataShape;
use crate::dsl::Params;
use crate::error::{NodeError, NodeResult};

/// Source node emitting the records embedded in its `rows` parameter.
pub struct InlineDataNode;

impl BuiltinNode for InlineDataNode {
    fn node_type(&self) -> &'static str {
        "InlineDataNode"
    }

    fn execute(&self, _node_id: &str, params: &Params, _inputs: &[Value]) -> NodeResult<Value> {
        let rows = params
            .get("rows")
            .ok_or_else(|| NodeError::ConfigError("rows is required".to_string()))?;
        let mut frame = Frame::from_value(rows)?;
        frame.shape = DataShape::Dataframe;

        if let Some(columns) = params.get("columns").and_then(Value::as_array) {
            let columns: Vec<&str> = columns.iter().filter_map(Value::as_str).collect();
            for row in &mut frame.rows {
                let projected: Map<String, Value> = columns
                    .iter()
                    .map(|c| (c.to_string(), row.remove(*c).unwrap_or(Value::Null)))
                    .collect();
                *row = projected;
            }
        }
        frame.metadata.insert("source".into(), Value::from("inline"));
        Ok(frame.to_value())
    }
}
