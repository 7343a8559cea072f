//! TOML configuration for the `xpipeline` binary and embedders.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use xpipeline_types::SecurityPolicy;

use crate::core::EngineConfig;
use crate::error::PipelineError;
use crate::sandbox::{SandboxConfig, SandboxMode};

/// Env var naming the directory the guest resolves catalog entry scripts against.
pub const NODES_DIR_ENV: &str = "XPIPELINE_NODES_DIR";
pub const PYTHON_ENV: &str = "XPIPELINE_PYTHON";
pub const NODE_ENV: &str = "XPIPELINE_NODE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XPipelineConfig {
    pub engine: EngineConfig,
    pub sandbox: SandboxConfig,
    pub security: SecurityPolicy,
    pub paths: PathsConfig,
    pub interpreters: InterpreterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Catalog node scripts (`<NodeType>.py` / `<NodeType>.js`).
    pub nodes_dir: PathBuf,
    /// User-authored node directories, each with a `node.json` manifest.
    pub custom_nodes_dir: Option<PathBuf>,
    /// Root that `dataset` parameters are resolved against.
    pub datasets_dir: PathBuf,
    /// Where run results are written; results are kept in memory when unset.
    pub runs_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            nodes_dir: PathBuf::from("nodes"),
            custom_nodes_dir: None,
            datasets_dir: PathBuf::from("data"),
            runs_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub python: String,
    pub javascript: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            javascript: "node".to_string(),
        }
    }
}

impl XPipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content).map_err(|e| PipelineError::ConfigError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Environment handed to every sandbox unit.
    ///
    /// Container images ship their own nodes directory, so it is only passed
    /// through for host processes.
    pub fn sandbox_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (PYTHON_ENV.to_string(), self.interpreters.python.clone()),
            (NODE_ENV.to_string(), self.interpreters.javascript.clone()),
        ];
        if self.sandbox.mode == SandboxMode::Process {
            let nodes_dir = std::fs::canonicalize(&self.paths.nodes_dir)
                .unwrap_or_else(|_| self.paths.nodes_dir.clone());
            env.push((NODES_DIR_ENV.to_string(), nodes_dir.to_string_lossy().into_owned()));
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = XPipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, XPipelineConfig::default());
        assert_eq!(config.engine.max_execution_time_secs, 600);
        assert_eq!(config.sandbox.mode, SandboxMode::Process);
        assert!(!config.security.enable_network);
    }

    #[test]
    fn test_partial_tables() {
        let config = XPipelineConfig::from_toml_str(
            r#"
[engine]
max_concurrency = 4
parallel_enabled = false

[sandbox]
mode = "docker"
memory_mb = 256

[security]
enable_network = true
allowed_modules = ["pandas", "numpy"]
max_memory_mb = 128

[paths]
nodes_dir = "/opt/nodes"
custom_nodes_dir = "/opt/custom"

[interpreters]
python = "/usr/bin/python3.11"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.max_concurrency, 4);
        assert!(!config.engine.parallel_enabled);
        assert_eq!(config.engine.max_execution_time_secs, 600);
        assert_eq!(config.sandbox.mode, SandboxMode::Docker);
        assert_eq!(config.sandbox.memory_mb, 256);
        assert_eq!(config.sandbox.timeout_secs, 60);
        assert!(config.security.enable_network);
        assert_eq!(config.security.allowed_modules, vec!["pandas", "numpy"]);
        assert_eq!(config.security.max_memory_mb, 128);
        assert_eq!(config.paths.custom_nodes_dir, Some(PathBuf::from("/opt/custom")));
        assert_eq!(config.interpreters.python, "/usr/bin/python3.11");
        assert_eq!(config.interpreters.javascript, "node");
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = XPipelineConfig::from_toml_str("[engine\nmax = ").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = XPipelineConfig::load(Path::new("/nonexistent/xpipeline.toml")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }

    #[test]
    fn test_sandbox_env_by_mode() {
        let mut config = XPipelineConfig::default();
        let keys = |c: &XPipelineConfig| c.sandbox_env().into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert!(keys(&config).contains(&NODES_DIR_ENV.to_string()));
        config.sandbox.mode = SandboxMode::Docker;
        assert_eq!(keys(&config), vec![PYTHON_ENV, NODE_ENV]);
    }
}
