//! Checkpointing for the Pregel runtime
//!
//! A checkpoint captures everything needed to continue a run at a superstep
//! boundary: the global state, every vertex's vote and value snapshot, and
//! the messages waiting for delivery.
//!
//! # Usage
//!
//! ```ignore
//! let checkpointer = create_checkpointer::<FlowState, FlowMessage>(
//!     CheckpointerConfig::File { path: "./checkpoints".into(), compression: true },
//!     run_id,
//! )?;
//! let runtime = PregelRuntime::with_config(config).with_checkpointer(checkpointer.into());
//! ```

mod file;

pub use file::FileCheckpointer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::error::PregelError;
use super::message::VertexMessage;
use super::state::MasterState;
use super::vertex::{VertexId, VertexState};

/// Run state at a superstep boundary, taken before the superstep executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "S: MasterState, M: VertexMessage")]
pub struct Checkpoint<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    pub run_id: String,

    /// Superstep to execute next on resume
    pub superstep: usize,

    pub state: S,

    pub vertex_states: HashMap<VertexId, VertexState>,

    /// Vertex value snapshots
    #[serde(default)]
    pub vertex_values: HashMap<VertexId, serde_json::Value>,

    /// Messages waiting to be delivered in `superstep`
    pub pending_messages: HashMap<VertexId, Vec<M>>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl<S, M> Checkpoint<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    pub fn new(
        run_id: impl Into<String>,
        superstep: usize,
        state: S,
        vertex_states: HashMap<VertexId, VertexState>,
        pending_messages: HashMap<VertexId, Vec<M>>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            superstep,
            state,
            vertex_states,
            vertex_values: HashMap::new(),
            pending_messages,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_vertex_values(mut self, vertex_values: HashMap<VertexId, serde_json::Value>) -> Self {
        self.vertex_values = vertex_values;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn pending_message_count(&self) -> usize {
        self.pending_messages.values().map(Vec::len).sum()
    }
}

/// Durable storage for checkpoints of one run
#[async_trait]
pub trait Checkpointer<S, M>: Send + Sync
where
    S: MasterState,
    M: VertexMessage,
{
    /// Save a checkpoint, replacing any at the same superstep
    async fn save(&self, checkpoint: &Checkpoint<S, M>) -> Result<(), PregelError>;

    async fn load(&self, superstep: usize) -> Result<Option<Checkpoint<S, M>>, PregelError>;

    async fn latest(&self) -> Result<Option<Checkpoint<S, M>>, PregelError>;

    /// Superstep numbers of all checkpoints, ascending
    async fn list(&self) -> Result<Vec<usize>, PregelError>;

    async fn delete(&self, superstep: usize) -> Result<(), PregelError>;

    /// Drop all but the newest `keep` checkpoints; returns the number dropped
    async fn prune(&self, keep: usize) -> Result<usize, PregelError> {
        let supersteps = self.list().await?;
        let excess = supersteps.len().saturating_sub(keep);
        for &superstep in &supersteps[..excess] {
            self.delete(superstep).await?;
        }
        Ok(excess)
    }
}

/// Checkpointer backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckpointerConfig {
    /// In-memory, lost with the process
    #[default]
    Memory,

    /// One JSON file per checkpoint under `path/<run_id>/`
    File {
        path: PathBuf,
        /// Compress with zstd
        compression: bool,
    },
}

/// In-memory checkpointer
#[derive(Debug)]
pub struct MemoryCheckpointer<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    checkpoints: tokio::sync::RwLock<HashMap<usize, Checkpoint<S, M>>>,
}

impl<S, M> MemoryCheckpointer<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    pub fn new() -> Self {
        Self {
            checkpoints: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl<S, M> Default for MemoryCheckpointer<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S, M> Checkpointer<S, M> for MemoryCheckpointer<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    async fn save(&self, checkpoint: &Checkpoint<S, M>) -> Result<(), PregelError> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.superstep, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, superstep: usize) -> Result<Option<Checkpoint<S, M>>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(&superstep).cloned())
    }

    async fn latest(&self) -> Result<Option<Checkpoint<S, M>>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .keys()
            .max()
            .and_then(|superstep| checkpoints.get(superstep))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<usize>, PregelError> {
        let checkpoints = self.checkpoints.read().await;
        let mut supersteps: Vec<usize> = checkpoints.keys().copied().collect();
        supersteps.sort_unstable();
        Ok(supersteps)
    }

    async fn delete(&self, superstep: usize) -> Result<(), PregelError> {
        self.checkpoints.write().await.remove(&superstep);
        Ok(())
    }
}

/// Create a checkpointer for the run `run_id`
pub fn create_checkpointer<S, M>(
    config: CheckpointerConfig,
    run_id: impl Into<String>,
) -> Box<dyn Checkpointer<S, M>>
where
    S: MasterState,
    M: VertexMessage,
{
    match config {
        CheckpointerConfig::Memory => Box::new(MemoryCheckpointer::<S, M>::new()),
        CheckpointerConfig::File { path, compression } => {
            Box::new(FileCheckpointer::new(path, run_id.into(), compression))
        }
    }
}
