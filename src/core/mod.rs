//! Run-time side of the pipeline: execution context, the executor and its events.

pub mod dispatcher;
pub mod event_bus;
pub mod execution_context;

pub use dispatcher::{EngineConfig, PipelineExecutor, RunResult, RunStatus};
pub use event_bus::{create_event_channel, EventReceiver, EventSender, PipelineEvent};
pub use execution_context::{ExecutionContext, DATASET_PARAM};
