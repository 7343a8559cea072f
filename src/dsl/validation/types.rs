//! Validation error types.

use serde::{Deserialize, Serialize};

/// Which phase of compilation produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Syntax,
    Semantic,
    Parameter,
    Dependency,
    Schema,
    TypeCompatibility,
}

/// Severity level of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single, addressable validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<String>,
}

impl ValidationError {
    pub fn error(kind: ValidationErrorKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            node_id: None,
            field_path: None,
            source_location: None,
        }
    }

    pub fn warning(kind: ValidationErrorKind, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, code, message)
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn at_field(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = Some(field_path.into());
        self
    }

    pub fn at_location(mut self, location: impl Into<String>) -> Self {
        self.source_location = Some(location.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(node_id) = &self.node_id {
            write!(f, " (node {})", node_id)?;
        }
        if let Some(field) = &self.field_path {
            write!(f, " at {}", field)?;
        }
        Ok(())
    }
}

/// Aggregated result of pipeline validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub diagnostics: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn from_diagnostics(diagnostics: Vec<ValidationError>) -> Self {
        let is_valid = diagnostics.iter().all(|d| !d.is_error());
        Self {
            is_valid,
            diagnostics,
        }
    }

    /// Return only the error-level diagnostics.
    pub fn errors(&self) -> Vec<&ValidationError> {
        self.diagnostics.iter().filter(|d| d.is_error()).collect()
    }

    /// Return only the warning-level diagnostics.
    pub fn warnings(&self) -> Vec<&ValidationError> {
        self.diagnostics.iter().filter(|d| !d.is_error()).collect()
    }

    pub fn extend(&mut self, more: impl IntoIterator<Item = ValidationError>) {
        self.diagnostics.extend(more);
        self.is_valid = self.diagnostics.iter().all(|d| !d.is_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(severity: Severity, code: &str) -> ValidationError {
        let e = ValidationError::error(ValidationErrorKind::Semantic, code, format!("test {}", code));
        ValidationError { severity, ..e }
    }

    #[test]
    fn test_report_partitions_by_severity() {
        let report = ValidationReport::from_diagnostics(vec![
            make(Severity::Error, "E001"),
            make(Severity::Warning, "W001"),
            make(Severity::Error, "E002"),
        ]);
        assert!(!report.is_valid);
        assert_eq!(report.errors().len(), 2);
        assert_eq!(report.warnings().len(), 1);
    }

    #[test]
    fn test_warnings_only_is_valid() {
        let mut report = ValidationReport::from_diagnostics(vec![make(Severity::Warning, "W201")]);
        assert!(report.is_valid);
        report.extend(vec![make(Severity::Error, "E101")]);
        assert!(!report.is_valid);
    }

    #[test]
    fn test_serialized_shape() {
        let e = ValidationError::error(ValidationErrorKind::TypeCompatibility, "E303", "bad shape")
            .at_node("bt")
            .at_field("depends_on[0]");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["kind"], "type_compatibility");
        assert_eq!(v["severity"], "error");
        assert_eq!(v["nodeId"], "bt");
        assert_eq!(v["fieldPath"], "depends_on[0]");
        assert!(v.get("sourceLocation").is_none());
    }

    #[test]
    fn test_display_mentions_node_and_field() {
        let e = ValidationError::error(ValidationErrorKind::Parameter, "E201", "Missing parameter 'b'")
            .at_node("n1")
            .at_field("params.b");
        assert_eq!(e.to_string(), "[E201] Missing parameter 'b' (node n1) at params.b");
    }
}
