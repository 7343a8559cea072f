//! Collaborators the engine talks to through traits: dataset resolution and
//! run result storage.

pub mod datasets;
pub mod run_store;

pub use datasets::{DatasetProvider, LocalDatasetProvider};
pub use run_store::{FileRunStore, MemoryRunStore, RunStore};
