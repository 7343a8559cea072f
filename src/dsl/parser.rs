//! Pipeline parser: converts raw YAML/JSON/TOML text into a [`PipelineDocument`].
//!
//! The parser has no knowledge of node types. Every structural defect becomes a
//! syntax-kind [`ValidationError`]; malformed input never panics.

use serde_json::Value;

use super::schema::{NodeDeclaration, PipelineDocument};
use super::validation::{ValidationError, ValidationErrorKind};

/// Supported source formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DslFormat {
    /// YAML format (`.yaml` / `.yml`).
    #[default]
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl DslFormat {
    /// Guess the format from a file extension, defaulting to YAML.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "json" => DslFormat::Json,
            "toml" => DslFormat::Toml,
            _ => DslFormat::Yaml,
        }
    }
}

/// Parse pipeline source into a document, or the list of syntax errors found.
pub fn parse_pipeline(
    content: &str,
    format: DslFormat,
) -> Result<PipelineDocument, Vec<ValidationError>> {
    let root = parse_value(content, format).map_err(|msg| vec![syntax("E001", msg)])?;
    document_from_value(root)
}

fn parse_value(content: &str, format: DslFormat) -> Result<Value, String> {
    match format {
        DslFormat::Yaml => {
            if content.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_saphyr::from_str::<Value>(content).map_err(|e| format!("YAML parse error: {}", e))
        }
        DslFormat::Json => {
            serde_json::from_str(content).map_err(|e| format!("JSON parse error: {}", e))
        }
        DslFormat::Toml => {
            let toml_val: toml::Value =
                toml::from_str(content).map_err(|e| format!("TOML parse error: {}", e))?;
            Ok(toml_value_to_json(toml_val))
        }
    }
}

/// Convert a [`toml::Value`] into a [`serde_json::Value`].
///
/// TOML has no null, and `Datetime` values are stringified.
fn toml_value_to_json(val: toml::Value) -> Value {
    match val {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_value_to_json).collect()),
        toml::Value::Table(tbl) => Value::Object(
            tbl.into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

fn document_from_value(root: Value) -> Result<PipelineDocument, Vec<ValidationError>> {
    let mut doc = PipelineDocument::default();
    let entries = match root {
        Value::Null => Vec::new(),
        Value::Array(entries) => entries,
        Value::Object(mut obj) => {
            doc.id = scalar_string(obj.get("id"));
            doc.name = scalar_string(obj.get("name"));
            doc.description = scalar_string(obj.get("description"));
            doc.version = scalar_string(obj.get("version"));
            match obj.remove("nodes") {
                Some(Value::Array(entries)) => entries,
                Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(vec![syntax("E002", "`nodes` must be a list of node entries")
                        .at_field("nodes")])
                }
                None => {
                    return Err(vec![syntax(
                        "E002",
                        "Root mapping must contain a `nodes` list",
                    )])
                }
            }
        }
        other => {
            return Err(vec![syntax(
                "E002",
                format!(
                    "Root must be a list of node entries, found {}",
                    value_kind(&other)
                ),
            )])
        }
    };

    let mut errors = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_node(index, entry) {
            Ok(node) => doc.nodes.push(node),
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() {
        Ok(doc)
    } else {
        Err(errors)
    }
}

fn parse_node(index: usize, entry: Value) -> Result<NodeDeclaration, Vec<ValidationError>> {
    let location = format!("nodes[{}]", index);
    let mut obj = match entry {
        Value::Object(obj) => obj,
        other => {
            return Err(vec![syntax(
                "E004",
                format!(
                    "Node entry {} must be a mapping, found {}",
                    index,
                    value_kind(&other)
                ),
            )
            .at_location(&location)])
        }
    };

    let mut errors = Vec::new();
    let id = match obj.remove("id") {
        Some(Value::String(id)) => Some(id),
        Some(other) => {
            errors.push(
                syntax("E004", format!("`id` must be a string, found {}", value_kind(&other)))
                    .at_field(format!("{}.id", location)),
            );
            None
        }
        None => {
            errors.push(
                syntax("E004", "Missing required field `id`")
                    .at_field(format!("{}.id", location)),
            );
            None
        }
    };

    let node_type = match obj.remove("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => Some(t),
        Some(Value::String(_)) => {
            errors.push(
                syntax("E004", "`type` must not be empty").at_field(format!("{}.type", location)),
            );
            None
        }
        Some(other) => {
            errors.push(
                syntax(
                    "E004",
                    format!("`type` must be a string, found {}", value_kind(&other)),
                )
                .at_field(format!("{}.type", location)),
            );
            None
        }
        None => {
            errors.push(
                syntax("E004", "Missing required field `type`")
                    .at_field(format!("{}.type", location)),
            );
            None
        }
    };

    let params_key = if obj.contains_key("params") {
        "params"
    } else {
        "parameters"
    };
    let parameters = match obj.remove(params_key) {
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            errors.push(
                syntax(
                    "E004",
                    format!("`params` must be a mapping, found {}", value_kind(&other)),
                )
                .at_field(format!("{}.params", location)),
            );
            None
        }
        None => {
            errors.push(
                syntax("E004", "Missing required field `params`")
                    .at_field(format!("{}.params", location)),
            );
            None
        }
    };

    let deps_value = obj.remove("depends_on").or_else(|| obj.remove("dependsOn"));
    let depends_on = match deps_value {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => {
            let mut deps = Vec::with_capacity(items.len());
            let mut ok = true;
            for (i, item) in items.into_iter().enumerate() {
                match item {
                    Value::String(dep) => deps.push(dep),
                    other => {
                        ok = false;
                        errors.push(
                            syntax(
                                "E005",
                                format!(
                                    "Dependency entries must be node ids (strings), found {}",
                                    value_kind(&other)
                                ),
                            )
                            .at_field(format!("{}.depends_on[{}]", location, i)),
                        );
                    }
                }
            }
            ok.then_some(deps)
        }
        Some(other) => {
            errors.push(
                syntax(
                    "E005",
                    format!(
                        "`depends_on` must be a list of node ids, found {}",
                        value_kind(&other)
                    ),
                )
                .at_field(format!("{}.depends_on", location)),
            );
            None
        }
    };

    match (id, node_type, parameters, depends_on) {
        (Some(id), Some(node_type), Some(parameters), Some(depends_on)) if errors.is_empty() => {
            Ok(NodeDeclaration {
                id,
                node_type,
                parameters,
                depends_on,
            })
        }
        (id, ..) => Err(errors
            .into_iter()
            .map(|e| {
                let e = e.at_location(&location);
                match &id {
                    Some(id) => e.at_node(id),
                    None => e,
                }
            })
            .collect()),
    }
}

fn syntax(code: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::error(ValidationErrorKind::Syntax, code, message)
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
