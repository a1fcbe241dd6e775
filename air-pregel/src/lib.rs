//! air-pregel: accumulator-based Pregel runtime with push-relabel max flow
//!
//! - `pregel`: bulk-synchronous vertex runtime with checkpointing
//! - `expr`: sandboxed expression language for custom accumulators
//! - `accumulator`: accumulator declarations and the residual-edge flow accumulator
//! - `push_relabel`: phase machine and vertex program computing maximum flow
//! - `graph`: graph documents, validation and the in-memory store
//! - `engine`: submit, monitor, cancel and resume runs
//!
//! ```rust,ignore
//! use air_pregel::{air_program, GraphStore, PregelEngine, RunParams, fixtures};
//!
//! let store = Arc::new(GraphStore::new());
//! store.insert(fixtures::diamond()).await?;
//!
//! let engine = PregelEngine::new(store);
//! let program = air_program("flow", 1000, false)?;
//! let id = engine.submit("air", "Diamond", program, RunParams::new("s", "t")).await?;
//! let status = engine.wait(id).await?;
//! assert_eq!(status.stats.max_flow, Some(2.0));
//! ```

pub mod accumulator;
pub mod engine;
pub mod expr;
pub mod graph;
pub mod pregel;
pub mod program;
pub mod push_relabel;

// Re-exports for convenience
pub use accumulator::{
    AccumulatorError, AccumulatorSpec, AccumulatorType, CustomAccumulator, CustomAccumulatorSpec, FlowAccumulator,
    FlowEntry, FlowInput, FlowMap, ValueType, FLOW_ACCUMULATOR,
};
pub use engine::{EngineConfig, EngineError, PregelEngine, RunId, RunParams, RunState, RunStats, RunStatus};
pub use expr::{EvalError, Expr, Interpreter, Value};
pub use graph::{fixtures, EdgeDocument, Graph, GraphDefinition, GraphError, GraphStore, VertexDocument};
pub use pregel::{
    CheckpointerConfig, PregelConfig, PregelError, PregelRuntime, Report, ReportLevel, RunResult, VertexId,
};
pub use program::{PhaseSpec, ProgramError, ProgramSpec};
pub use push_relabel::{air_program, max_flow, FlowState, Phase, ALGORITHM, DEFAULT_MAX_GSS};
