//! Runtime errors
//!
//! Any error returned from a superstep ends the run. Errors attributable to
//! a single vertex carry its id so the engine can annotate its report.

use super::vertex::VertexId;
use crate::expr::EvalError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PregelError {
    /// The superstep budget ran out before the master state finished
    #[error("Superstep budget exhausted at superstep {0}")]
    MaxSuperstepsExceeded(usize),

    #[error("Vertex {0} timed out")]
    VertexTimeout(VertexId),

    #[error("Vertex {vertex_id} failed: {message}")]
    VertexError {
        vertex_id: VertexId,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A vertex heard from, or about, a neighbour it has no edge to
    #[error("Topology error at {vertex_id}: {message} (neighbour {neighbour})")]
    Topology {
        vertex_id: VertexId,
        neighbour: String,
        message: String,
    },

    /// An accumulator program failed to evaluate
    #[error("Expression failed at {vertex_id} in {phase}: {source}")]
    Expression {
        vertex_id: VertexId,
        phase: String,
        #[source]
        source: EvalError,
    },

    #[error("Undeliverable message: {0}")]
    MessageDeliveryError(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Cancellation observed at a superstep barrier
    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded its {0:?} time limit")]
    RunTimeout(Duration),

    #[error("Checkpoint belongs to run {found}, expected {expected}")]
    CheckpointMismatch { expected: String, found: String },
}

impl PregelError {
    pub fn vertex_error(vertex_id: impl Into<VertexId>, message: impl Into<String>) -> Self {
        PregelError::VertexError {
            vertex_id: vertex_id.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn vertex_error_with_source(
        vertex_id: impl Into<VertexId>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PregelError::VertexError {
            vertex_id: vertex_id.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn topology(vertex_id: impl Into<VertexId>, neighbour: impl Into<String>, message: impl Into<String>) -> Self {
        PregelError::Topology {
            vertex_id: vertex_id.into(),
            neighbour: neighbour.into(),
            message: message.into(),
        }
    }

    pub fn expression(vertex_id: impl Into<VertexId>, phase: impl Into<String>, source: EvalError) -> Self {
        PregelError::Expression {
            vertex_id: vertex_id.into(),
            phase: phase.into(),
            source,
        }
    }

    pub fn checkpoint_error(message: impl Into<String>) -> Self {
        PregelError::CheckpointError(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        PregelError::ConfigError(message.into())
    }

    pub fn checkpoint_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        PregelError::CheckpointMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PregelError::VertexTimeout(_) | PregelError::RunTimeout(_))
    }

    /// The vertex an error is attributed to
    pub fn vertex(&self) -> Option<&VertexId> {
        match self {
            PregelError::VertexTimeout(id) => Some(id),
            PregelError::VertexError { vertex_id, .. }
            | PregelError::Topology { vertex_id, .. }
            | PregelError::Expression { vertex_id, .. } => Some(vertex_id),
            _ => None,
        }
    }
}
