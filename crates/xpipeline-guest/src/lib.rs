//! Harness that runs inside every sandbox unit.
//!
//! The host launches `xpipeline-guest <input> <output>`. The harness checks the
//! guest source with a [`CapabilityGuard`], runs the interpreter under a
//! [`ResourceMonitor`] and always leaves an output file behind, so guest
//! failures and policy violations reach the host as structured results.

pub mod harness;
pub mod monitor;
pub mod restrict;

pub use harness::{GuestEnvironment, Harness, HarnessError};
pub use monitor::{MemorySampler, MonitorOutcome, ProcSampler, ResourceMonitor};
pub use restrict::{CapabilityGuard, ModuleRef};
