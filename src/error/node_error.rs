use thiserror::Error;

/// Node-level errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Input error: {0}")]
    InputError(String),
    #[error("Missing column '{column}' in input of node {node_id}")]
    MissingColumn { node_id: String, column: String },
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_display() {
        assert_eq!(
            NodeError::ConfigError("period".into()).to_string(),
            "Configuration error: period"
        );
        assert_eq!(
            NodeError::MissingColumn {
                node_id: "sma".into(),
                column: "close".into()
            }
            .to_string(),
            "Missing column 'close' in input of node sma"
        );
        assert_eq!(NodeError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let node_err: NodeError = err.into();
        assert!(matches!(node_err, NodeError::SerializationError(_)));
    }
}
