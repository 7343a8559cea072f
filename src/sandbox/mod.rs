//! Out-of-process execution of sandboxed node types.
//!
//! Every node execution gets its own unit (a child process or a container),
//! a fresh work directory holding `input.json`, and a wall-clock ceiling.
//! Units are tracked per run so a run can be cancelled as a whole.

pub mod custom;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod runner;
pub mod types;

pub use custom::{CustomNodeDefinition, CustomNodeRegistry, CustomRunner};
pub use error::SandboxError;
pub use launcher::{DockerLauncher, LaunchSpec, Launcher, ProcessLauncher, SandboxUnit, UnitExit};
pub use lifecycle::{SandboxLifecycle, SandboxRun};
pub use runner::SandboxedRunner;
pub use types::{EntryPoint, Mount, SandboxConfig, SandboxMode, SandboxRequest};
