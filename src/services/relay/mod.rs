//! Streaming Completion Pipeline
//!
//! - `context` - request-scoped state and stage tracking
//! - `assembler` - SSE event construction and delta accumulation
//! - `pipeline` - the stage driver
//! - `persist` - assistant message completion and write-back

pub mod assembler;
pub mod context;
pub mod persist;
pub mod pipeline;

pub use assembler::EventAssembler;
pub use context::{Accumulator, ModelSelection, RelayContext, Stage};
pub use pipeline::{PipelineExecutor, PipelineSettings, PreparedRelay, RelayOutcome};
