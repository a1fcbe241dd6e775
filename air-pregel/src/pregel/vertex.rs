//! Vertices and their per-superstep context
//!
//! A vertex sees its own value, the messages addressed to it in the previous
//! superstep and a read-only view of the master state. Everything else goes
//! through its outbox.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::PregelError;
use super::message::VertexMessage;
use super::report::Report;
use super::state::MasterState;

/// Unique identifier for a vertex, `collection/key` for graph vertices
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub String);

impl VertexId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the collection prefix
    pub fn key(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, key)| key)
    }
}

impl From<&str> for VertexId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VertexId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&VertexId> for VertexId {
    fn from(id: &VertexId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vote cast by a vertex at the end of its computation.
///
/// A halted vertex wakes up when a message arrives; a completed one stays
/// asleep for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VertexState {
    #[default]
    Active,
    Halted,
    Completed,
}

impl VertexState {
    pub fn is_active(&self) -> bool {
        matches!(self, VertexState::Active)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self, VertexState::Halted)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, VertexState::Completed)
    }
}

/// Contribution of one vertex to the master state
pub trait StateUpdate: Clone + Send + Sync + 'static {
    /// The update applied when no vertex computed
    fn empty() -> Self;

    fn is_empty(&self) -> bool;
}

/// What a vertex may see and do during `compute`
pub struct ComputeContext<'a, S, M: VertexMessage> {
    /// Sent to this vertex during the previous superstep
    pub messages: &'a [M],
    pub superstep: usize,
    /// Master state as of the last barrier
    pub state: &'a S,
    outbox: HashMap<VertexId, Vec<M>>,
    reports: Vec<Report>,
    vertex_id: VertexId,
}

impl<'a, S, M: VertexMessage> ComputeContext<'a, S, M> {
    pub fn new(vertex_id: VertexId, messages: &'a [M], superstep: usize, state: &'a S) -> Self {
        Self {
            messages,
            superstep,
            state,
            outbox: HashMap::new(),
            reports: Vec::new(),
            vertex_id,
        }
    }

    pub fn id(&self) -> &VertexId {
        &self.vertex_id
    }

    /// Queue a message; `target` reads it in the next superstep
    pub fn send_message(&mut self, target: impl Into<VertexId>, message: M) {
        self.outbox.entry(target.into()).or_default().push(message);
    }

    /// Queue the same message for every target
    pub fn broadcast(&mut self, targets: impl IntoIterator<Item = impl Into<VertexId>>, message: M) {
        for target in targets {
            self.send_message(target.into(), message.clone());
        }
    }

    /// Emit a report, annotated with this vertex and the superstep
    pub fn report(&mut self, report: Report) {
        let report = report
            .with_annotation("vertex", self.vertex_id.as_str())
            .with_annotation("superstep", self.superstep);
        self.reports.push(report);
    }

    /// Number of messages queued for sending
    pub fn sent_count(&self) -> usize {
        self.outbox.values().map(Vec::len).sum()
    }

    /// Consume the context and return the outbox and reports
    pub fn into_parts(self) -> (HashMap<VertexId, Vec<M>>, Vec<Report>) {
        (self.outbox, self.reports)
    }
}

/// A vertex program instance.
///
/// The vertex owns its value; the runtime reaches it only through
/// `snapshot`, `restore` and `output`.
#[async_trait]
pub trait Vertex<S, M>: Send + Sync
where
    S: MasterState,
    M: VertexMessage,
{
    fn id(&self) -> &VertexId;

    /// One superstep of work for an active vertex
    async fn compute(
        &self,
        ctx: &mut ComputeContext<'_, S, M>,
    ) -> Result<ComputeResult<S::Update>, PregelError>;

    /// Vote after messages arrive for a halted vertex; wakes it by default
    fn on_reactivation(&self, _messages: &[M]) -> VertexState {
        VertexState::Active
    }

    /// Serializable copy of the vertex value, stored in checkpoints.
    ///
    /// `Null` means there is nothing to store. An error fails the checkpoint.
    fn snapshot(&self) -> Result<serde_json::Value, PregelError> {
        Ok(serde_json::Value::Null)
    }

    /// Replace the vertex value from a checkpoint snapshot
    fn restore(&self, _snapshot: &serde_json::Value) -> Result<(), PregelError> {
        Ok(())
    }

    /// Final result of the vertex, collected when the run finishes
    fn output(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Update and vote returned from `compute`
#[derive(Debug, Clone)]
pub struct ComputeResult<U: StateUpdate> {
    pub update: U,
    /// Vote for the next superstep
    pub state: VertexState,
}

impl<U: StateUpdate> ComputeResult<U> {
    pub fn active(update: U) -> Self {
        Self {
            update,
            state: VertexState::Active,
        }
    }

    pub fn halt(update: U) -> Self {
        Self {
            update,
            state: VertexState::Halted,
        }
    }

    pub fn complete(update: U) -> Self {
        Self {
            update,
            state: VertexState::Completed,
        }
    }
}

/// Shared handle to a vertex of any concrete type
pub type BoxedVertex<S, M> = Arc<dyn Vertex<S, M>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::report::ReportLevel;
    use crate::push_relabel::{FlowState, PhaseReport};
    use std::sync::Mutex;

    /// Sums incoming numbers into its value and forwards the total
    struct SumVertex {
        id: VertexId,
        total: Mutex<i64>,
    }

    #[async_trait]
    impl Vertex<FlowState, i64> for SumVertex {
        fn id(&self) -> &VertexId {
            &self.id
        }

        async fn compute(
            &self,
            ctx: &mut ComputeContext<'_, FlowState, i64>,
        ) -> Result<ComputeResult<PhaseReport>, PregelError> {
            let received: i64 = ctx.messages.iter().sum();
            let total = {
                let mut total = self.total.lock().map_err(|_| PregelError::vertex_error("nodes/sum", "poisoned"))?;
                *total += received;
                *total
            };
            ctx.send_message("output", total);
            if received < 0 {
                ctx.report(Report::warn("negative input"));
            }
            Ok(ComputeResult::halt(PhaseReport {
                pushes: 1,
                ..PhaseReport::default()
            }))
        }

        fn snapshot(&self) -> Result<serde_json::Value, PregelError> {
            Ok(serde_json::json!(*self.total.lock().unwrap()))
        }

        fn restore(&self, snapshot: &serde_json::Value) -> Result<(), PregelError> {
            let value = snapshot
                .as_i64()
                .ok_or_else(|| PregelError::vertex_error("nodes/sum", "expected integer"))?;
            *self.total.lock().unwrap() = value;
            Ok(())
        }
    }

    fn sum_vertex() -> SumVertex {
        SumVertex {
            id: VertexId::new("nodes/sum"),
            total: Mutex::new(0),
        }
    }

    #[tokio::test]
    async fn test_vertex_compute_sends_and_reports() {
        let vertex = sum_vertex();
        let state = FlowState::new();
        let messages = vec![4, -7];

        let mut ctx = ComputeContext::new(vertex.id().clone(), &messages, 3, &state);
        let result = vertex.compute(&mut ctx).await.unwrap();
        assert!(result.state.is_halted());
        assert_eq!(ctx.sent_count(), 1);

        let (outbox, reports) = ctx.into_parts();
        assert_eq!(outbox[&VertexId::new("output")], vec![-3]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].level, ReportLevel::Warn);
        assert_eq!(reports[0].annotations["vertex"], "nodes/sum");
        assert_eq!(reports[0].annotations["superstep"], 3);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let vertex = sum_vertex();
        vertex.restore(&serde_json::json!(11)).unwrap();
        assert_eq!(vertex.snapshot().unwrap(), serde_json::json!(11));
        assert!(vertex.restore(&serde_json::json!("x")).is_err());
        assert_eq!(vertex.output(), None);
    }

    #[test]
    fn test_compute_context_broadcast() {
        let state = FlowState::new();
        let messages: Vec<i64> = vec![];
        let mut ctx = ComputeContext::new(VertexId::new("b"), &messages, 0, &state);

        ctx.broadcast(["a", "b", "c"], 1i64);
        ctx.send_message("a", 2);

        let (outbox, _) = ctx.into_parts();
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox[&VertexId::new("a")], vec![1, 2]);
    }

    #[test]
    fn test_compute_context_helpers() {
        let state = FlowState::new();
        let messages = vec![1i64, 2];
        let ctx = ComputeContext::<FlowState, i64>::new(VertexId::new("t"), &messages, 0, &state);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.sent_count(), 0);
        assert_eq!(ctx.id(), &VertexId::new("t"));
    }

    #[test]
    fn test_compute_result_constructors() {
        let update = PhaseReport {
            relabels: 2,
            ..PhaseReport::default()
        };
        assert!(ComputeResult::active(update.clone()).state.is_active());
        assert!(ComputeResult::halt(update.clone()).state.is_halted());
        assert!(ComputeResult::complete(update).state.is_completed());
    }

    #[test]
    fn test_vertex_state_helpers() {
        assert!(VertexState::Active.is_active());
        assert!(VertexState::Halted.is_halted());
        assert!(VertexState::Completed.is_completed());
        assert!(!VertexState::Completed.is_halted());
        assert_eq!(VertexState::default(), VertexState::Active);
    }

    #[test]
    fn test_vertex_id_key() {
        assert_eq!(VertexId::new("nodes/v1").key(), "v1");
        assert_eq!(VertexId::new("plain").key(), "plain");
        assert_eq!(VertexId::new("nodes/v1").to_string(), "nodes/v1");
    }

    #[test]
    fn test_vertex_id_serialization() {
        let id = VertexId::new("nodes/s");
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: VertexId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
