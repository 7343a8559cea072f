use serde_json::{Map, Value};

use super::frame::{as_number, Frame, Record};
use super::{single_input, BuiltinNode};
use crate::catalog::builtin::aggregation_column_name;
use crate::catalog::DataShape;
use crate::dsl::Params;
use crate::error::{NodeError, NodeResult};

/// Groups rows (optionally by one column) and reduces columns per group.
pub struct AggregateNode;

impl BuiltinNode for AggregateNode {
    fn node_type(&self) -> &'static str {
        "AggregateNode"
    }

    fn execute(&self, node_id: &str, params: &Params, inputs: &[Value]) -> NodeResult<Value> {
        let frame = single_input(node_id, inputs)?;
        let aggregations = params
            .get("aggregations")
            .and_then(Value::as_array)
            .ok_or_else(|| NodeError::ConfigError("aggregations must be an array".to_string()))?;
        let group_by = params.get("group_by").and_then(Value::as_str);
        if let Some(key) = group_by {
            frame.require_column(node_id, key)?;
        }

        let mut groups: Vec<(Value, Vec<&Record>)> = Vec::new();
        for row in &frame.rows {
            let key = group_by
                .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        if groups.is_empty() && group_by.is_none() {
            groups.push((Value::Null, Vec::new()));
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, rows) in &groups {
            let mut record = Map::new();
            if let Some(k) = group_by {
                record.insert(k.to_string(), key.clone());
            }
            for agg in aggregations {
                let name = aggregation_column_name(agg)
                    .ok_or_else(|| NodeError::ConfigError("aggregation is missing 'op'".to_string()))?;
                let op = agg.get("op").and_then(Value::as_str).unwrap_or_default();
                let column = agg.get("column").and_then(Value::as_str);
                if let Some(column) = column {
                    frame.require_column(node_id, column)?;
                }
                record.insert(name, reduce(op, column, rows)?);
            }
            out.push(record);
        }

        let mut result = Frame::new(DataShape::Dataframe, out);
        result
            .metadata
            .insert("groups".into(), Value::from(groups.len()));
        Ok(result.to_value())
    }
}

fn reduce(op: &str, column: Option<&str>, rows: &[&Record]) -> NodeResult<Value> {
    let cells: Vec<&Value> = match column {
        Some(c) => rows.iter().filter_map(|r| r.get(c)).filter(|v| !v.is_null()).collect(),
        None => Vec::new(),
    };
    let numbers = || cells.iter().filter_map(|v| as_number(v));
    let value = match op {
        "count" => Value::from(if column.is_some() { cells.len() } else { rows.len() }),
        "first" => cells.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        "last" => cells.last().map(|v| (*v).clone()).unwrap_or(Value::Null),
        "sum" => number(Some(numbers().sum::<f64>())),
        "mean" => {
            let (sum, n) = numbers().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            number((n > 0).then(|| sum / n as f64))
        }
        "min" => number(numbers().reduce(f64::min)),
        "max" => number(numbers().reduce(f64::max)),
        other => {
            return Err(NodeError::ConfigError(format!(
                "unknown aggregation '{}'",
                other
            )))
        }
    };
    Ok(value)
}

fn number(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
