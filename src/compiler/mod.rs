pub mod compiled_pipeline;
pub mod compiler;

pub use compiled_pipeline::{
    CompiledPipeline, IrDependency, IrNode, IrNodeMetadata, PipelineMetadata,
};
pub use compiler::{compile_ir, CompileFailure, PipelineCompiler};
