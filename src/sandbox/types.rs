use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xpipeline_types::GuestLanguage;

/// How sandbox units are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Direct child process in its own process group.
    #[default]
    Process,
    /// One container per unit through the docker CLI.
    Docker,
}

/// Sandbox configuration, the `[sandbox]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    pub image: String,
    pub memory_mb: u64,
    pub cpu_cores: f64,
    /// Host-side wall-clock ceiling per unit.
    pub timeout_secs: u64,
    /// Size of the writable `/tmp` tmpfs inside a container.
    pub scratch_mb: u64,
    pub user: String,
    pub network: String,
    pub pids_limit: u32,
    /// Parent directory for per-unit work directories. System temp when unset.
    pub work_root: Option<PathBuf>,
    /// Command started inside the unit; the input and output file paths are appended.
    pub guest_command: Vec<String>,
    pub docker_binary: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::Process,
            image: "xpipeline-sandbox:latest".to_string(),
            memory_mb: 512,
            cpu_cores: 1.0,
            timeout_secs: 60,
            scratch_mb: 64,
            user: "1000:1000".to_string(),
            network: "none".to_string(),
            pids_limit: 64,
            work_root: None,
            guest_command: vec!["xpipeline-guest".to_string()],
            docker_binary: "docker".to_string(),
        }
    }
}

/// Host directory exposed read-only to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Stable name; containers see it under `/mnt/<name>`.
    pub name: String,
    pub host_path: PathBuf,
}

/// What the guest runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// Node script shipped with the sandbox image, resolved by the guest
    /// against its nodes directory (e.g. `DataLoaderNode.py`).
    Catalog(String),
    /// User code carried inline in the node parameters.
    Inline(String),
    /// Script file inside a host directory that gets mounted for the unit.
    File { dir: PathBuf, file: String },
}

/// One node execution handed to [`super::SandboxLifecycle::run`].
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub node_id: String,
    pub node_type: String,
    pub language: GuestLanguage,
    pub params: Map<String, Value>,
    pub inputs: Map<String, Value>,
    pub entry: EntryPoint,
    /// Scan the entry file as well as inline code.
    pub scan_entry: bool,
    /// Dataset name to host path.
    pub datasets: BTreeMap<String, PathBuf>,
}

impl SandboxRequest {
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        language: GuestLanguage,
        entry: EntryPoint,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            language,
            params: Map::new(),
            inputs: Map::new(),
            entry,
            scan_entry: false,
            datasets: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_partial_toml() {
        let config: SandboxConfig = toml::from_str("mode = \"docker\"\nmemory_mb = 256").unwrap();
        assert_eq!(config.mode, SandboxMode::Docker);
        assert_eq!(config.memory_mb, 256);
        assert_eq!(config.network, "none");
        assert_eq!(config.guest_command, vec!["xpipeline-guest"]);
    }
}
