//! Pregel runtime - bulk synchronous execution of vertex programs
//!
//! Each superstep follows the sequence: Deliver → Compute → Collect → Route,
//! then the master applies the merged vertex updates to the global state.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;

use super::checkpoint::{Checkpoint, Checkpointer};
use super::config::PregelConfig;
use super::error::PregelError;
use super::message::VertexMessage;
use super::report::Report;
use super::state::MasterState;
use super::vertex::{BoxedVertex, ComputeContext, ComputeResult, VertexId, VertexState};

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunResult<S: MasterState> {
    /// Final global state
    pub state: S,
    /// Number of supersteps executed
    pub supersteps: usize,
    pub completed: bool,
    pub vertex_states: HashMap<VertexId, VertexState>,
    /// `Vertex::output` of every vertex that produced one
    pub outputs: HashMap<VertexId, serde_json::Value>,
    /// Reports emitted by vertices during the run
    pub reports: Vec<Report>,
}

/// Snapshot published at the start of every superstep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub superstep: usize,
    pub phase: String,
    pub active: usize,
    pub pending_messages: usize,
}

type Outbox<M> = HashMap<VertexId, Vec<M>>;

/// Output of one vertex task
struct TaskOutput<U: super::vertex::StateUpdate, M> {
    vertex_id: VertexId,
    result: Result<ComputeResult<U>, PregelError>,
    outbox: Outbox<M>,
    reports: Vec<Report>,
}

/// Pregel runtime
///
/// Owns the vertices, their vote-to-halt states and the pending message
/// queues. Vertex values live inside the vertices themselves.
pub struct PregelRuntime<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    config: PregelConfig,
    vertices: HashMap<VertexId, BoxedVertex<S, M>>,
    vertex_states: HashMap<VertexId, VertexState>,
    /// Messages delivered at the start of the next superstep
    message_queues: HashMap<VertexId, Vec<M>>,
    run_id: String,
    checkpointer: Option<Arc<dyn Checkpointer<S, M>>>,
    cancel: Arc<AtomicBool>,
    progress: Option<watch::Sender<Progress>>,
    reports: Vec<Report>,
}

impl<S, M> PregelRuntime<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    pub fn new() -> Self {
        Self::with_config(PregelConfig::default())
    }

    pub fn with_config(config: PregelConfig) -> Self {
        Self {
            config,
            vertices: HashMap::new(),
            vertex_states: HashMap::new(),
            message_queues: HashMap::new(),
            run_id: uuid::Uuid::new_v4().to_string(),
            checkpointer: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
            reports: Vec::new(),
        }
    }

    /// Set the run id, which checkpoints must match on restore
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Save checkpoints every `checkpoint_interval` supersteps
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer<S, M>>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Share a cancellation flag, checked at every superstep barrier
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: watch::Sender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PregelConfig {
        &self.config
    }

    /// Reports emitted so far, kept when the run fails
    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Add a vertex; it starts active
    pub fn add_vertex(&mut self, vertex: BoxedVertex<S, M>) -> &mut Self {
        let id = vertex.id().clone();
        self.vertex_states.insert(id.clone(), VertexState::Active);
        self.message_queues.insert(id.clone(), Vec::new());
        self.vertices.insert(id, vertex);
        self
    }

    /// Run to completion from superstep 0, bounded by `run_timeout`
    pub async fn run(&mut self, initial_state: S) -> Result<RunResult<S>, PregelError> {
        self.run_from_superstep(initial_state, 0).await
    }

    /// Continue from the latest saved checkpoint, if there is one
    pub async fn resume(&mut self) -> Result<Option<RunResult<S>>, PregelError> {
        let checkpointer = self
            .checkpointer
            .clone()
            .ok_or_else(|| PregelError::config_error("resume requires a checkpointer"))?;

        match checkpointer.latest().await? {
            Some(checkpoint) => self.run_from_checkpoint(checkpoint).await.map(Some),
            None => Ok(None),
        }
    }

    /// Restore vertex states, values and queues, then continue at the checkpoint's superstep
    pub async fn run_from_checkpoint(
        &mut self,
        checkpoint: Checkpoint<S, M>,
    ) -> Result<RunResult<S>, PregelError> {
        self.restore_from_checkpoint(&checkpoint)?;
        self.run_from_superstep(checkpoint.state, checkpoint.superstep).await
    }

    async fn run_from_superstep(
        &mut self,
        initial_state: S,
        start_superstep: usize,
    ) -> Result<RunResult<S>, PregelError> {
        let run_timeout = self.config.run_timeout;
        match timeout(run_timeout, self.run_inner(initial_state, start_superstep)).await {
            Ok(result) => result,
            Err(_) => Err(PregelError::RunTimeout(run_timeout)),
        }
    }

    async fn run_inner(&mut self, initial_state: S, start_superstep: usize) -> Result<RunResult<S>, PregelError> {
        let mut state = initial_state;
        let mut superstep = start_superstep;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(run_id = %self.run_id, superstep, "Run cancelled");
                return Err(PregelError::Cancelled);
            }

            if state.is_terminal() {
                return Ok(self.finish(state, superstep));
            }

            if self.is_quiescent() {
                match state.on_quiescence() {
                    Some(next) if !next.is_terminal() => {
                        tracing::debug!(superstep, phase = %next.phase_name(), "Quiescent, master continues");
                        state = next;
                    }
                    Some(next) => return Ok(self.finish(next, superstep)),
                    None => return Ok(self.finish(state, superstep)),
                }
            }

            if state.activate_all() {
                for vertex_state in self.vertex_states.values_mut() {
                    if !vertex_state.is_completed() {
                        *vertex_state = VertexState::Active;
                    }
                }
            }

            if superstep >= self.config.max_supersteps {
                return Err(PregelError::MaxSuperstepsExceeded(superstep));
            }

            if self.config.should_checkpoint(superstep) {
                self.save_checkpoint(superstep, &state).await?;
            }

            self.publish_progress(superstep, &state);

            let updates = self.execute_superstep(superstep, &state).await?;
            state = state.apply_updates(updates);
            superstep += 1;
        }
    }

    fn finish(&self, state: S, supersteps: usize) -> RunResult<S> {
        let outputs = self
            .vertices
            .iter()
            .filter_map(|(id, vertex)| vertex.output().map(|output| (id.clone(), output)))
            .collect();

        tracing::info!(
            run_id = %self.run_id,
            supersteps,
            phase = %state.phase_name(),
            "Run finished"
        );

        RunResult {
            state,
            supersteps,
            completed: true,
            vertex_states: self.vertex_states.clone(),
            outputs,
            reports: self.reports.clone(),
        }
    }

    /// All vertices inactive and no message in flight
    fn is_quiescent(&self) -> bool {
        self.vertex_states.values().all(|s| !s.is_active()) && self.pending_message_count() == 0
    }

    fn pending_message_count(&self) -> usize {
        self.message_queues.values().map(Vec::len).sum()
    }

    fn publish_progress(&self, superstep: usize, state: &S) {
        let progress = Progress {
            superstep,
            phase: state.phase_name(),
            active: self.vertex_states.values().filter(|s| s.is_active()).count(),
            pending_messages: self.pending_message_count(),
        };

        if self.config.log_supersteps {
            tracing::debug!(
                superstep,
                phase = %progress.phase,
                active = progress.active,
                pending = progress.pending_messages,
                "Superstep starting"
            );
        }

        if let Some(sender) = &self.progress {
            sender.send_replace(progress);
        }
    }

    /// Execute a single superstep and return the updates of all computed vertices
    pub(crate) async fn execute_superstep(&mut self, superstep: usize, state: &S) -> Result<Vec<S::Update>, PregelError> {
        let mut inboxes = self.deliver_messages();

        for (vertex_id, messages) in &inboxes {
            if let (Some(vertex_state), Some(vertex)) =
                (self.vertex_states.get_mut(vertex_id), self.vertices.get(vertex_id))
            {
                if vertex_state.is_halted() {
                    *vertex_state = vertex.on_reactivation(messages);
                }
            }
        }

        let mut active: Vec<VertexId> = self
            .vertex_states
            .iter()
            .filter(|(_, s)| s.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let vertex_timeout = self.config.vertex_timeout;
        let mut handles = Vec::with_capacity(active.len());

        for vertex_id in active {
            let Some(vertex) = self.vertices.get(&vertex_id).map(Arc::clone) else {
                continue;
            };
            let messages = inboxes.remove(&vertex_id).unwrap_or_default();
            let state = state.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_id = vertex_id.clone();

            let handle = tokio::spawn(async move {
                let vertex_id = task_id;
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TaskOutput {
                            result: Err(PregelError::vertex_error_with_source(
                                vertex_id.clone(),
                                "semaphore closed",
                                e,
                            )),
                            vertex_id,
                            outbox: HashMap::new(),
                            reports: Vec::new(),
                        }
                    }
                };

                let mut ctx = ComputeContext::new(vertex_id.clone(), &messages, superstep, &state);
                let result = match timeout(vertex_timeout, vertex.compute(&mut ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(PregelError::VertexTimeout(vertex_id.clone())),
                };
                let (outbox, reports) = ctx.into_parts();

                TaskOutput {
                    vertex_id,
                    result,
                    outbox,
                    reports,
                }
            });

            handles.push((vertex_id, handle));
        }

        let mut updates = Vec::with_capacity(handles.len());
        let mut outboxes = Vec::with_capacity(handles.len());
        let mut failure = None;

        for (vertex_id, handle) in handles {
            let output = handle
                .await
                .map_err(|e| PregelError::vertex_error_with_source(vertex_id, "task join error", e))?;

            self.reports.extend(output.reports);
            match output.result {
                Ok(result) => {
                    self.vertex_states.insert(output.vertex_id.clone(), result.state);
                    updates.push(result.update);
                    outboxes.push((output.vertex_id, output.outbox));
                }
                Err(e) => {
                    tracing::warn!(vertex = %output.vertex_id, superstep, error = %e, "Vertex computation failed");
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        self.route_messages(outboxes)?;
        Ok(updates)
    }

    fn deliver_messages(&mut self) -> HashMap<VertexId, Vec<M>> {
        self.message_queues
            .iter_mut()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(id, queue)| (id.clone(), std::mem::take(queue)))
            .collect()
    }

    /// Queue outgoing messages in source order for delivery next superstep
    fn route_messages(&mut self, outboxes: Vec<(VertexId, Outbox<M>)>) -> Result<(), PregelError> {
        for (source, outbox) in outboxes {
            for (target, messages) in outbox {
                let queue = self.message_queues.get_mut(&target).ok_or_else(|| {
                    PregelError::MessageDeliveryError(format!("{} sent to unknown vertex {}", source, target))
                })?;
                queue.extend(messages);
            }
        }
        Ok(())
    }

    fn restore_from_checkpoint(&mut self, checkpoint: &Checkpoint<S, M>) -> Result<(), PregelError> {
        if checkpoint.run_id != self.run_id {
            return Err(PregelError::checkpoint_mismatch(&self.run_id, &checkpoint.run_id));
        }

        let unknown: Vec<_> = checkpoint
            .vertex_states
            .keys()
            .filter(|id| !self.vertices.contains_key(*id))
            .collect();
        if !unknown.is_empty() {
            return Err(PregelError::checkpoint_error(format!(
                "Checkpoint contains vertices not present in current runtime: {:?}",
                unknown
            )));
        }

        let missing = self
            .vertices
            .keys()
            .filter(|id| !checkpoint.vertex_states.contains_key(*id))
            .count();
        if missing > 0 {
            tracing::warn!(missing, "Vertices absent from checkpoint keep their current state");
        }

        for (id, vertex_state) in &checkpoint.vertex_states {
            self.vertex_states.insert(id.clone(), *vertex_state);
        }

        for (id, queue) in &mut self.message_queues {
            *queue = checkpoint.pending_messages.get(id).cloned().unwrap_or_default();
        }

        for (id, value) in &checkpoint.vertex_values {
            if let Some(vertex) = self.vertices.get(id) {
                vertex.restore(value)?;
            }
        }

        tracing::info!(
            run_id = %checkpoint.run_id,
            superstep = checkpoint.superstep,
            pending = checkpoint.pending_message_count(),
            "Restored from checkpoint"
        );
        Ok(())
    }

    fn create_checkpoint(&self, superstep: usize, state: &S) -> Result<Checkpoint<S, M>, PregelError> {
        let mut vertex_values = HashMap::new();
        for (id, vertex) in &self.vertices {
            let value = vertex.snapshot()?;
            if !value.is_null() {
                vertex_values.insert(id.clone(), value);
            }
        }

        let pending = self
            .message_queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(id, queue)| (id.clone(), queue.clone()))
            .collect();

        let checkpoint = Checkpoint::new(
            &self.run_id,
            superstep,
            state.clone(),
            self.vertex_states.clone(),
            pending,
        )
        .with_vertex_values(vertex_values)
        .with_metadata("phase", state.phase_name());
        Ok(checkpoint)
    }

    async fn save_checkpoint(&self, superstep: usize, state: &S) -> Result<(), PregelError> {
        let Some(checkpointer) = &self.checkpointer else {
            return Ok(());
        };
        let checkpoint = self.create_checkpoint(superstep, state)?;
        checkpointer.save(&checkpoint).await?;
        tracing::info!(run_id = %self.run_id, superstep, "Checkpoint saved");

        if self.config.checkpoint_retention > 0 {
            let pruned = checkpointer.prune(self.config.checkpoint_retention).await?;
            if pruned > 0 {
                tracing::debug!(run_id = %self.run_id, pruned, "Old checkpoints pruned");
            }
        }
        Ok(())
    }
}

impl<S, M> Default for PregelRuntime<S, M>
where
    S: MasterState,
    M: VertexMessage,
{
    fn default() -> Self {
        Self::new()
    }
}
