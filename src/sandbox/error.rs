/// Host-side sandbox errors. Guest failures are not errors here: they come
/// back as classified [`xpipeline_types::SandboxOutput`] values.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to launch sandbox unit: {0}")]
    LaunchFailed(String),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Sandbox run cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            SandboxError::LaunchFailed("docker: not found".into()).to_string(),
            "Failed to launch sandbox unit: docker: not found"
        );
        assert_eq!(SandboxError::Cancelled.to_string(), "Sandbox run cancelled");
    }
}
