// Pipeline assembly
//
// Declares the fixed media graph and negotiates every connection in it.
// `builder` owns stage creation, configuration, and registration; `linker`
// owns link negotiation, including request-pad rollback on partial failure.

pub mod builder;
pub mod linker;

pub use builder::{BuiltPipeline, PipelineBuilder, DECLARED_STAGES, PIPELINE_NAME};
pub use linker::PadLinker;
