pub mod builtin;
pub mod runner;

pub use builtin::BuiltinRunner;
pub use runner::{ExecutionResult, NodeInput, NodeInvocation, Runner, RunnerSet};
