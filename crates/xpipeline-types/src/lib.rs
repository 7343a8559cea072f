//! Shared contract between the xpipeline host and the in-sandbox guest harness.
//!
//! The host writes a [`SandboxInput`] as JSON to an input file, launches the
//! isolated unit with two positional arguments (input path, output path) and
//! reads back whatever the guest wrote to the output path, classified through
//! [`SandboxOutput::from_value`].

pub mod policy;
pub mod sandbox;
pub mod violation;

pub use policy::{ModuleCategory, SecurityPolicy};
pub use sandbox::{
    GuestLanguage, ResourceStats, SandboxContext, SandboxInput, SandboxOutput, INPUT_FILE_NAME,
    OUTPUT_FILE_NAME,
};
pub use violation::{SandboxViolation, ViolationKind};

/// Exit code reserved for "the unit was forcibly killed" (128 + SIGKILL).
///
/// Used to tell cancellation and OOM kills apart from guest-reported failures.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Exit code the guest harness uses when it could not even produce an output file.
pub const HARNESS_FAILURE_EXIT_CODE: i32 = 2;
