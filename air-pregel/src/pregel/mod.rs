//! Bulk-synchronous vertex runtime
//!
//! A run is a sequence of supersteps separated by barriers. Within one
//! superstep every active vertex sees the messages sent to it in the previous
//! superstep, computes in parallel with the others and returns an update for
//! the master state. At the barrier the runtime:
//!
//! ```text
//!   inboxes ──► compute (parallel, bounded) ──► outboxes
//!                      │                            │
//!                      ▼                            ▼
//!            merge updates, apply to        queue for superstep + 1
//!            the master state
//! ```
//!
//! A vertex that votes to halt sleeps until a message arrives. When no vertex
//! is active and nothing is queued, [`MasterState::on_quiescence`] decides
//! whether the run ends or moves to another phase.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod message;
pub mod report;
pub mod runtime;
pub mod state;
pub mod vertex;

pub use checkpoint::{
    create_checkpointer, Checkpoint, Checkpointer, CheckpointerConfig, FileCheckpointer, MemoryCheckpointer,
};
pub use config::PregelConfig;
pub use error::PregelError;
pub use message::{FlowMessage, VertexMessage};
pub use report::{Report, ReportLevel};
pub use runtime::{PregelRuntime, Progress, RunResult};
pub use state::MasterState;
pub use vertex::{BoxedVertex, ComputeContext, ComputeResult, StateUpdate, Vertex, VertexId, VertexState};
