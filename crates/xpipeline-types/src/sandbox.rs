//! Input and output payloads of the sandbox process contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::SecurityPolicy;
use crate::violation::{SandboxViolation, ViolationKind};

pub const INPUT_FILE_NAME: &str = "input.json";
pub const OUTPUT_FILE_NAME: &str = "output.json";

/// Guest runtime a sandboxed node is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestLanguage {
    Python,
    #[serde(alias = "js", alias = "node")]
    JavaScript,
}

impl GuestLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestLanguage::Python => "python",
            GuestLanguage::JavaScript => "javascript",
        }
    }
}

/// File written by the host before the unit is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInput {
    pub node_type: String,
    pub params: Map<String, Value>,
    /// Outputs of the node's dependencies, keyed by dependency id.
    pub inputs: Map<String, Value>,
    pub context: SandboxContext,
}

/// The subset of the run context a guest is allowed to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxContext {
    pub run_id: String,
    pub pipeline_id: String,
    pub node_id: String,
    pub language: GuestLanguage,
    /// Dataset name to the read-only path visible inside the unit.
    #[serde(default)]
    pub datasets: BTreeMap<String, String>,
    /// Entry script the harness hands the input and output paths to.
    #[serde(default)]
    pub entry: Option<String>,
    /// User-authored source checked before anything runs.
    #[serde(default)]
    pub code: Option<String>,
    /// Also check the entry script itself (user-authored custom nodes).
    #[serde(default)]
    pub scan_entry: bool,
    #[serde(default)]
    pub security: SecurityPolicy,
}

/// Peak resource usage observed by the in-sandbox monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub peak_memory_bytes: u64,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub samples: u64,
}

/// Classified content of the output file.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutput {
    Success {
        result: Value,
        stats: Option<ResourceStats>,
        logs: Vec<String>,
    },
    Failure {
        error: String,
        violation: Option<SandboxViolation>,
        logs: Vec<String>,
    },
}

impl SandboxOutput {
    pub fn success(result: Value, stats: Option<ResourceStats>) -> Self {
        SandboxOutput::Success {
            result,
            stats,
            logs: Vec::new(),
        }
    }

    pub fn violation(violation: SandboxViolation) -> Self {
        SandboxOutput::Failure {
            error: violation.message.clone(),
            violation: Some(violation),
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SandboxOutput::Success { .. })
    }

    pub fn as_violation(&self) -> Option<&SandboxViolation> {
        match self {
            SandboxOutput::Failure { violation, .. } => violation.as_ref(),
            SandboxOutput::Success { .. } => None,
        }
    }

    /// Classify a parsed output payload.
    ///
    /// Accepts `{result}`, `{success: true, result, stats}`,
    /// `{success: false, error, violationType?, details?}` and the legacy
    /// `{error, type: "execution_error"}` shape. Any other object is taken as
    /// the result itself.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut obj) = value else {
            return SandboxOutput::success(value, None);
        };
        let logs = take_logs(&mut obj);

        let failed = match obj.get("success") {
            Some(Value::Bool(ok)) => !ok,
            _ => obj.contains_key("error") && !obj.contains_key("result"),
        };

        if failed {
            let error = match obj.remove("error") {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => "guest reported failure without a message".to_string(),
                Some(other) => other.to_string(),
            };
            let details = obj.remove("details").unwrap_or(Value::Null);
            let violation = obj
                .get("violationType")
                .and_then(Value::as_str)
                .and_then(ViolationKind::parse)
                .map(|kind| SandboxViolation::new(kind, error.clone()).with_details(details));
            return SandboxOutput::Failure {
                error,
                violation,
                logs,
            };
        }

        let stats = obj
            .remove("stats")
            .and_then(|s| serde_json::from_value::<ResourceStats>(s).ok());
        let result = match obj.remove("result") {
            Some(result) => result,
            None => {
                obj.remove("success");
                Value::Object(obj)
            }
        };
        SandboxOutput::Success {
            result,
            stats,
            logs,
        }
    }

    /// Serialise into the wire shape written by the guest harness.
    pub fn to_value(&self) -> Value {
        match self {
            SandboxOutput::Success {
                result,
                stats,
                logs,
            } => {
                let mut obj = Map::new();
                obj.insert("success".into(), Value::Bool(true));
                obj.insert("result".into(), result.clone());
                if let Some(stats) = stats {
                    obj.insert(
                        "stats".into(),
                        serde_json::to_value(stats).unwrap_or(Value::Null),
                    );
                }
                if !logs.is_empty() {
                    obj.insert("logs".into(), Value::from(logs.clone()));
                }
                Value::Object(obj)
            }
            SandboxOutput::Failure {
                error,
                violation,
                logs,
            } => {
                let mut obj = Map::new();
                obj.insert("success".into(), Value::Bool(false));
                obj.insert("error".into(), Value::String(error.clone()));
                if let Some(v) = violation {
                    obj.insert("violationType".into(), Value::String(v.kind.to_string()));
                    if !v.details.is_null() {
                        obj.insert("details".into(), v.details.clone());
                    }
                }
                if !logs.is_empty() {
                    obj.insert("logs".into(), Value::from(logs.clone()));
                }
                Value::Object(obj)
            }
        }
    }
}

fn take_logs(obj: &mut Map<String, Value>) -> Vec<String> {
    match obj.remove("logs") {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    }
}
