//! Dependency graph construction and ordering.

pub mod ordering;

pub use ordering::{CycleError, DependencyGraph};
