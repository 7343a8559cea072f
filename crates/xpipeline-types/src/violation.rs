use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a structured sandbox violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    MemoryLimit,
    Timeout,
    RestrictedModule,
    DynamicCode,
    UnauthorizedModule,
    RuntimeError,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MemoryLimit => "MEMORY_LIMIT",
            ViolationKind::Timeout => "TIMEOUT",
            ViolationKind::RestrictedModule => "RESTRICTED_MODULE",
            ViolationKind::DynamicCode => "DYNAMIC_CODE",
            ViolationKind::UnauthorizedModule => "UNAUTHORIZED_MODULE",
            ViolationKind::RuntimeError => "RUNTIME_ERROR",
        }
    }

    /// Resource and security violations, as opposed to ordinary guest bugs.
    pub fn is_abuse(&self) -> bool {
        !matches!(self, ViolationKind::RuntimeError)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MEMORY_LIMIT" => Some(ViolationKind::MemoryLimit),
            "TIMEOUT" => Some(ViolationKind::Timeout),
            "RESTRICTED_MODULE" => Some(ViolationKind::RestrictedModule),
            "DYNAMIC_CODE" => Some(ViolationKind::DynamicCode),
            "UNAUTHORIZED_MODULE" => Some(ViolationKind::UnauthorizedModule),
            "RUNTIME_ERROR" => Some(ViolationKind::RuntimeError),
            _ => None,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violation raised inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SandboxViolation {
    pub kind: ViolationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl SandboxViolation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_kind_wire_names() {
        let json = serde_json::to_string(&ViolationKind::MemoryLimit).unwrap();
        assert_eq!(json, "\"MEMORY_LIMIT\"");
        let kind: ViolationKind = serde_json::from_str("\"UNAUTHORIZED_MODULE\"").unwrap();
        assert_eq!(kind, ViolationKind::UnauthorizedModule);
        assert_eq!(ViolationKind::parse("DYNAMIC_CODE"), Some(ViolationKind::DynamicCode));
        assert_eq!(ViolationKind::parse("nope"), None);
    }

    #[test]
    fn test_violation_display_names_kind() {
        let v = SandboxViolation::new(ViolationKind::Timeout, "took 31000ms");
        assert_eq!(v.to_string(), "TIMEOUT: took 31000ms");
        assert!(v.kind.is_abuse());
        assert!(!ViolationKind::RuntimeError.is_abuse());
    }
}
