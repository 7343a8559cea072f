//! Capability and resource policy enforced inside the sandbox.

use serde::{Deserialize, Serialize};

/// Capability categories a guest module can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    FileSystem,
    Network,
    Process,
    Subprocess,
}

impl ModuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCategory::FileSystem => "filesystem",
            ModuleCategory::Network => "network",
            ModuleCategory::Process => "process",
            ModuleCategory::Subprocess => "subprocess",
        }
    }
}

/// Operator-controlled policy. Every category is denied unless enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityPolicy {
    #[serde(alias = "enable_file_system")]
    pub enable_file_system: bool,
    #[serde(alias = "enable_network")]
    pub enable_network: bool,
    #[serde(alias = "enable_process")]
    pub enable_process: bool,
    #[serde(alias = "enable_subprocess")]
    pub enable_subprocess: bool,
    /// When non-empty, only these modules may be loaded.
    #[serde(alias = "allowed_modules")]
    pub allowed_modules: Vec<String>,
    #[serde(alias = "max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(alias = "max_execution_ms")]
    pub max_execution_ms: u64,
    #[serde(alias = "sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enable_file_system: false,
            enable_network: false,
            enable_process: false,
            enable_subprocess: false,
            allowed_modules: Vec::new(),
            max_memory_mb: 512,
            max_execution_ms: 30_000,
            sample_interval_ms: 50,
        }
    }
}

impl SecurityPolicy {
    pub fn allows(&self, category: ModuleCategory) -> bool {
        match category {
            ModuleCategory::FileSystem => self.enable_file_system,
            ModuleCategory::Network => self.enable_network,
            ModuleCategory::Process => self.enable_process,
            ModuleCategory::Subprocess => self.enable_subprocess,
        }
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}
