//! Push-relabel vertex program
//!
//! Every graph vertex runs one [`FlowVertex`]. Its value is the flow
//! accumulator over its residual edges, its label, its excess and a cache
//! of its neighbours' labels. Behaviour per superstep is selected by the
//! master phase.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::phase::{FlowState, Phase, PhaseReport};
use crate::accumulator::label::{self, Label};
use crate::accumulator::{AccumulatorError, FlowAccumulator, FlowEntry, FlowMap, FLOW_EPSILON};
use crate::graph::ResidualEdge;
use crate::pregel::{
    ComputeContext, ComputeResult, FlowMessage, PregelError, Report, Vertex, VertexId,
};

/// Run-wide parameters shared by all vertices
#[derive(Debug, Clone, PartialEq)]
pub struct FlowParams {
    pub source: VertexId,
    pub sink: VertexId,
    pub vertex_count: usize,
}

/// Value owned by a flow vertex
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowValue {
    pub flow: FlowMap,
    pub label: Label,
    pub excess: f64,
    pub neighbour_labels: BTreeMap<String, Label>,
    /// Finalized edge id to flow, set in the last superstep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BTreeMap<String, f64>>,
}

impl FlowValue {
    pub fn is_overflowing(&self) -> bool {
        self.excess > FLOW_EPSILON
    }
}

type FlowContext<'a> = ComputeContext<'a, FlowState, FlowMessage>;

pub struct FlowVertex {
    id: VertexId,
    edges: Vec<ResidualEdge>,
    params: Arc<FlowParams>,
    accumulator: Arc<FlowAccumulator>,
    value: Mutex<FlowValue>,
}

impl FlowVertex {
    pub fn new(
        id: VertexId,
        edges: Vec<ResidualEdge>,
        params: Arc<FlowParams>,
        accumulator: Arc<FlowAccumulator>,
    ) -> Self {
        Self {
            id,
            edges,
            params,
            accumulator,
            value: Mutex::new(FlowValue::default()),
        }
    }

    /// Copy of the current value
    pub fn value(&self) -> FlowValue {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, FlowValue> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_source(&self) -> bool {
        self.id == self.params.source
    }

    fn is_sink(&self) -> bool {
        self.id == self.params.sink
    }

    /// Source and sink never push or relabel after init
    fn is_terminal(&self) -> bool {
        self.is_source() || self.is_sink()
    }

    fn accumulator_error(&self, phase: Phase, err: AccumulatorError) -> PregelError {
        match err {
            AccumulatorError::MissingEntry { sender } => {
                PregelError::topology(&self.id, sender, "flow accumulator has no entry for sender")
            }
            AccumulatorError::Eval(source) => PregelError::expression(&self.id, phase.name(), source),
            other => PregelError::vertex_error_with_source(&self.id, format!("accumulator failed in {}", phase), other),
        }
    }

    fn unexpected(&self, phase: Phase, message: &FlowMessage) -> PregelError {
        PregelError::vertex_error(&self.id, format!("unexpected {} message in {}", message.kind(), phase))
    }

    fn known_neighbour(&self, value: &FlowValue, from: &VertexId, what: &str) -> Result<(), PregelError> {
        if value.neighbour_labels.contains_key(from.as_str()) {
            Ok(())
        } else {
            Err(PregelError::topology(&self.id, from.as_str(), format!("{} from a non-neighbour", what)))
        }
    }

    /// Build the accumulator, labels and cache; the source saturates its edges
    fn init(&self, ctx: &mut FlowContext<'_>, value: &mut FlowValue) -> Result<PhaseReport, PregelError> {
        let n = self.params.vertex_count;
        let mut entries = FlowMap::new();
        let mut report = PhaseReport::default();

        value.neighbour_labels.clear();
        for edge in &self.edges {
            let mut entry = FlowEntry::new(&edge.id, edge.capacity);
            if self.is_source() && edge.capacity > FLOW_EPSILON {
                entry.flow = edge.capacity;
                ctx.send_message(&edge.to, FlowMessage::push(&self.id, edge.capacity));
                report.pushes += 1;
            }
            entries.insert(edge.to.as_str().to_string(), entry);
            value
                .neighbour_labels
                .insert(edge.to.as_str().to_string(), label::initial(edge.to == self.params.source, n));
        }

        let cleared = self.accumulator.clear().map_err(|e| self.accumulator_error(Phase::Init, e))?;
        value.flow = self
            .accumulator
            .set(&cleared, entries)
            .map_err(|e| self.accumulator_error(Phase::Init, e))?;
        value.label = label::initial(self.is_source(), n);
        value.excess = 0.0;
        value.output = None;

        Ok(report)
    }

    /// Apply incoming pushes and label updates, then push along admissible edges
    fn push(&self, ctx: &mut FlowContext<'_>, value: &mut FlowValue) -> Result<PhaseReport, PregelError> {
        for message in ctx.messages {
            match message {
                FlowMessage::Push(input) => {
                    self.accumulator
                        .update(&mut value.flow, input)
                        .map_err(|e| self.accumulator_error(Phase::Push, e))?;
                    if !self.is_terminal() {
                        value.excess += input.additional_flow;
                    }
                }
                FlowMessage::LabelUpdate { from, label } => {
                    self.known_neighbour(value, from, "label update")?;
                    let cached = value.neighbour_labels.entry(from.as_str().to_string()).or_default();
                    *cached = label::merge(*cached, *label);
                }
                other => return Err(self.unexpected(Phase::Push, other)),
            }
        }

        let mut report = PhaseReport::default();
        if self.is_terminal() || !value.is_overflowing() {
            return Ok(report);
        }

        let mut edited = self
            .accumulator
            .get(&value.flow)
            .map_err(|e| self.accumulator_error(Phase::Push, e))?;
        for (neighbour, entry) in edited.iter_mut() {
            if !value.is_overflowing() {
                break;
            }
            let neighbour_label = value.neighbour_labels.get(neighbour).copied().unwrap_or_default();
            if !label::is_admissible(value.label, neighbour_label, entry.residual()) {
                continue;
            }
            let amount = value.excess.min(entry.residual());
            entry.flow += amount;
            value.excess -= amount;
            ctx.send_message(VertexId::new(neighbour.as_str()), FlowMessage::push(&self.id, amount));
            report.pushes += 1;
        }

        if report.pushes > 0 {
            value.flow = self
                .accumulator
                .set(&value.flow, edited)
                .map_err(|e| self.accumulator_error(Phase::Push, e))?;
        }
        Ok(report)
    }

    fn fetch_label(&self, ctx: &mut FlowContext<'_>, value: &FlowValue) -> Result<PhaseReport, PregelError> {
        if let Some(message) = ctx.messages.first() {
            return Err(self.unexpected(Phase::FetchLabel, message));
        }
        if value.is_overflowing() && !self.is_terminal() {
            let residual: Vec<VertexId> = value
                .flow
                .iter()
                .filter(|(_, entry)| entry.is_residual())
                .map(|(neighbour, _)| VertexId::new(neighbour.as_str()))
                .collect();
            ctx.broadcast(residual, FlowMessage::LabelRequest { from: self.id.clone() });
        }
        Ok(PhaseReport::default())
    }

    fn send_label(&self, ctx: &mut FlowContext<'_>, value: &FlowValue) -> Result<PhaseReport, PregelError> {
        for message in ctx.messages {
            match message {
                FlowMessage::LabelRequest { from } => {
                    self.known_neighbour(value, from, "label request")?;
                    ctx.send_message(
                        from,
                        FlowMessage::LabelResponse {
                            from: self.id.clone(),
                            label: value.label,
                        },
                    );
                }
                other => return Err(self.unexpected(Phase::SendLabel, other)),
            }
        }
        Ok(PhaseReport::default())
    }

    /// Store fresh neighbour labels and relabel when no edge is admissible
    fn relabel(&self, ctx: &mut FlowContext<'_>, value: &mut FlowValue) -> Result<PhaseReport, PregelError> {
        for message in ctx.messages {
            match message {
                FlowMessage::LabelResponse { from, label } => {
                    self.known_neighbour(value, from, "label response")?;
                    value.neighbour_labels.insert(from.as_str().to_string(), *label);
                }
                other => return Err(self.unexpected(Phase::Relabel, other)),
            }
        }

        let mut report = PhaseReport::default();
        if self.is_terminal() || !value.is_overflowing() {
            return Ok(report);
        }

        let residual_labels: Vec<Label> = value
            .flow
            .iter()
            .filter(|(_, entry)| entry.is_residual())
            .map(|(neighbour, _)| value.neighbour_labels.get(neighbour).copied().unwrap_or_default())
            .collect();
        if residual_labels
            .iter()
            .any(|neighbour| label::is_admissible(value.label, *neighbour, 1.0))
        {
            return Ok(report);
        }

        match label::relabel(value.label, residual_labels) {
            Some(new_label) => {
                tracing::trace!(vertex = %self.id, from = value.label, to = new_label, "Relabel");
                value.label = new_label;
                report.relabels += 1;
                let neighbours: Vec<&VertexId> = self.edges.iter().map(|edge| &edge.to).collect();
                ctx.broadcast(
                    neighbours,
                    FlowMessage::LabelUpdate {
                        from: self.id.clone(),
                        label: new_label,
                    },
                );
            }
            None => ctx.report(
                Report::warn("overflowing vertex has no residual edge")
                    .with_annotation("phase", Phase::Relabel.name())
                    .with_annotation("excess", value.excess),
            ),
        }
        Ok(report)
    }

    /// Tell every neighbour how much this vertex pushed toward it
    fn report_flows(&self, ctx: &mut FlowContext<'_>, value: &FlowValue) -> Result<PhaseReport, PregelError> {
        if let Some(message) = ctx.messages.first() {
            return Err(self.unexpected(Phase::Finalize, message));
        }
        for (neighbour, entry) in &value.flow {
            if entry.flow > FLOW_EPSILON {
                ctx.send_message(
                    VertexId::new(neighbour.as_str()),
                    FlowMessage::FlowReport {
                        from: self.id.clone(),
                        flow: entry.flow,
                    },
                );
            }
        }
        Ok(PhaseReport::default())
    }

    /// Cancel flow that went back and forth along a pair, then finalize
    fn reconcile(&self, ctx: &mut FlowContext<'_>, value: &mut FlowValue) -> Result<PhaseReport, PregelError> {
        let mut edited = self
            .accumulator
            .get(&value.flow)
            .map_err(|e| self.accumulator_error(Phase::Finalize, e))?;

        for message in ctx.messages {
            match message {
                FlowMessage::FlowReport { from, flow } => {
                    let entry = edited.get_mut(from.as_str()).ok_or_else(|| {
                        PregelError::topology(&self.id, from.as_str(), "flow report from a non-neighbour")
                    })?;
                    entry.flow -= entry.flow.min(*flow);
                }
                other => return Err(self.unexpected(Phase::Finalize, other)),
            }
        }

        value.flow = self
            .accumulator
            .set(&value.flow, edited)
            .map_err(|e| self.accumulator_error(Phase::Finalize, e))?;
        let output = self
            .accumulator
            .finalize(&value.flow)
            .map_err(|e| self.accumulator_error(Phase::Finalize, e))?;
        value.output = Some(output);
        Ok(PhaseReport::default())
    }
}

#[async_trait]
impl Vertex<FlowState, FlowMessage> for FlowVertex {
    fn id(&self) -> &VertexId {
        &self.id
    }

    async fn compute(&self, ctx: &mut FlowContext<'_>) -> Result<ComputeResult<PhaseReport>, PregelError> {
        let state = ctx.state.clone();
        let mut value = self.lock();

        let mut report = match state.phase {
            Phase::Init => {
                let report = self.init(ctx, &mut value)?;
                return Ok(ComputeResult::halt(report));
            }
            Phase::Push => self.push(ctx, &mut value)?,
            Phase::FetchLabel => self.fetch_label(ctx, &value)?,
            Phase::SendLabel => self.send_label(ctx, &value)?,
            Phase::Relabel => self.relabel(ctx, &mut value)?,
            Phase::Finalize if state.phase_step == 0 => {
                let report = self.report_flows(ctx, &value)?;
                return Ok(ComputeResult::halt(report));
            }
            Phase::Finalize => {
                let report = self.reconcile(ctx, &mut value)?;
                return Ok(ComputeResult::complete(report));
            }
            Phase::Done => return Ok(ComputeResult::complete(PhaseReport::default())),
        };

        if value.is_overflowing() && !self.is_terminal() {
            report.overflowing = 1;
            Ok(ComputeResult::active(report))
        } else {
            Ok(ComputeResult::halt(report))
        }
    }

    fn snapshot(&self) -> Result<serde_json::Value, PregelError> {
        serde_json::to_value(&*self.lock())
            .map_err(|e| PregelError::vertex_error_with_source(&self.id, "vertex value is not serializable", e))
    }

    /// Restores through the accumulator's `set`
    fn restore(&self, snapshot: &serde_json::Value) -> Result<(), PregelError> {
        let restored: FlowValue = serde_json::from_value(snapshot.clone())
            .map_err(|e| PregelError::vertex_error_with_source(&self.id, "invalid vertex snapshot", e))?;
        let mut value = self.lock();
        let flow = self
            .accumulator
            .set(&value.flow, restored.flow.clone())
            .map_err(|e| self.accumulator_error(Phase::Init, e))?;
        *value = FlowValue { flow, ..restored };
        Ok(())
    }

    fn output(&self) -> Option<serde_json::Value> {
        let value = self.lock();
        value.output.as_ref().and_then(|output| serde_json::to_value(output).ok())
    }
}

/// One vertex per graph vertex, sharing parameters and accumulator
pub fn build_vertices(
    residual_edges: BTreeMap<VertexId, Vec<ResidualEdge>>,
    params: FlowParams,
    accumulator: FlowAccumulator,
) -> Vec<Arc<FlowVertex>> {
    let params = Arc::new(params);
    let accumulator = Arc::new(accumulator);
    residual_edges
        .into_iter()
        .map(|(id, edges)| Arc::new(FlowVertex::new(id, edges, Arc::clone(&params), Arc::clone(&accumulator))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::FlowInput;
    use crate::pregel::ReportLevel;

    fn params() -> Arc<FlowParams> {
        Arc::new(FlowParams {
            source: VertexId::new("n/s"),
            sink: VertexId::new("n/t"),
            vertex_count: 4,
        })
    }

    fn edge(to: &str, id: &str, capacity: f64) -> ResidualEdge {
        ResidualEdge {
            to: VertexId::new(to),
            id: id.into(),
            capacity,
        }
    }

    /// `n/a` between source and sink: a -> t (2), reverse of s -> a
    fn middle_vertex() -> FlowVertex {
        FlowVertex::new(
            VertexId::new("n/a"),
            vec![edge("n/t", "e/at", 2.0), edge("n/s", "e/sa/reverse", 0.0)],
            params(),
            Arc::new(FlowAccumulator::Native),
        )
    }

    fn state(phase: Phase, phase_step: usize) -> FlowState {
        FlowState {
            phase,
            phase_step,
            ..FlowState::default()
        }
    }

    async fn step(
        vertex: &FlowVertex,
        state: &FlowState,
        messages: Vec<FlowMessage>,
    ) -> (
        Result<ComputeResult<PhaseReport>, PregelError>,
        std::collections::HashMap<VertexId, Vec<FlowMessage>>,
        Vec<Report>,
    ) {
        let mut ctx = ComputeContext::new(vertex.id().clone(), &messages, 0, state);
        let result = vertex.compute(&mut ctx).await;
        let (outbox, reports) = ctx.into_parts();
        (result, outbox, reports)
    }

    fn push_from(sender: &str, amount: f64) -> FlowMessage {
        FlowMessage::push(&VertexId::new(sender), amount)
    }

    #[tokio::test]
    async fn test_source_saturates_edges_on_init() {
        let source = FlowVertex::new(
            VertexId::new("n/s"),
            vec![edge("n/a", "e/sa", 3.0), edge("n/b", "e/sb", 0.0)],
            params(),
            Arc::new(FlowAccumulator::Native),
        );

        let (result, outbox, _) = step(&source, &state(Phase::Init, 0), vec![]).await;
        let result = result.unwrap();
        assert!(result.state.is_halted());
        assert_eq!(result.update.pushes, 1);
        assert_eq!(outbox[&VertexId::new("n/a")], vec![push_from("n/s", 3.0)]);
        assert!(!outbox.contains_key(&VertexId::new("n/b")));

        let value = source.value();
        assert_eq!(value.label, 4);
        assert_eq!(value.flow["n/a"].flow, 3.0);
        assert_eq!(value.flow["n/b"].flow, 0.0);
    }

    #[tokio::test]
    async fn test_push_respects_admissibility_and_residual() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();

        // label 0, sink label 0: nothing admissible yet
        let (result, outbox, _) = step(&vertex, &state(Phase::Push, 0), vec![push_from("n/s", 5.0)]).await;
        let result = result.unwrap();
        assert_eq!(result.update, PhaseReport { pushes: 0, relabels: 0, overflowing: 1 });
        assert!(result.state.is_active());
        assert!(outbox.is_empty());

        let value = vertex.value();
        assert_eq!(value.excess, 5.0);
        assert_eq!(value.flow["n/s"].capacity, 5.0);
        assert_eq!(value.flow["n/s"].flow, 0.0);
    }

    #[tokio::test]
    async fn test_relabel_round() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();
        step(&vertex, &state(Phase::Push, 0), vec![push_from("n/s", 5.0)]).await.0.unwrap();

        let (_, outbox, _) = step(&vertex, &state(Phase::FetchLabel, 0), vec![]).await;
        assert_eq!(outbox.len(), 2);

        let responses = vec![
            FlowMessage::LabelResponse {
                from: VertexId::new("n/t"),
                label: 0,
            },
            FlowMessage::LabelResponse {
                from: VertexId::new("n/s"),
                label: 4,
            },
        ];
        let (result, outbox, _) = step(&vertex, &state(Phase::Relabel, 0), responses).await;
        assert_eq!(result.unwrap().update.relabels, 1);
        assert_eq!(vertex.value().label, 1);
        assert_eq!(
            outbox[&VertexId::new("n/s")],
            vec![FlowMessage::LabelUpdate {
                from: VertexId::new("n/a"),
                label: 1
            }]
        );

        // next push: a -> t is admissible, carries min(excess, residual) = 2
        let (result, outbox, _) = step(&vertex, &state(Phase::Push, 0), vec![]).await;
        let result = result.unwrap();
        assert_eq!(result.update.pushes, 1);
        assert_eq!(outbox[&VertexId::new("n/t")], vec![push_from("n/a", 2.0)]);
        let value = vertex.value();
        assert_eq!(value.excess, 3.0);
        assert_eq!(value.flow["n/t"].flow, 2.0);
        assert!(value.flow["n/t"].flow <= value.flow["n/t"].capacity);
    }

    #[tokio::test]
    async fn test_send_label_answers_requests() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();

        let request = FlowMessage::LabelRequest {
            from: VertexId::new("n/t"),
        };
        let (result, outbox, _) = step(&vertex, &state(Phase::SendLabel, 0), vec![request]).await;
        assert!(result.unwrap().state.is_halted());
        assert_eq!(
            outbox[&VertexId::new("n/t")],
            vec![FlowMessage::LabelResponse {
                from: VertexId::new("n/a"),
                label: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_push_from_unknown_sender_is_topology_error() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();

        let (result, _, _) = step(&vertex, &state(Phase::Push, 0), vec![push_from("n/x", 1.0)]).await;
        match result {
            Err(PregelError::Topology { vertex_id, neighbour, .. }) => {
                assert_eq!(vertex_id, VertexId::new("n/a"));
                assert_eq!(neighbour, "n/x");
            }
            other => panic!("Wrong result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_program_backend_reports_expression_error() {
        let vertex = FlowVertex::new(
            VertexId::new("n/a"),
            vec![edge("n/t", "e/at", 2.0)],
            params(),
            Arc::new(FlowAccumulator::canonical_program().unwrap()),
        );
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();

        let (result, _, _) = step(&vertex, &state(Phase::Push, 0), vec![push_from("n/x", 1.0)]).await;
        match result {
            Err(PregelError::Expression { phase, .. }) => assert_eq!(phase, "push-phase"),
            other => panic!("Wrong result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_finalize_reconciles_back_and_forth_flow() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();
        {
            let mut value = vertex.lock();
            let back = value.flow.get_mut("n/s").unwrap();
            back.capacity = 1.0;
            back.flow = 1.0;
            value.flow.get_mut("n/t").unwrap().flow = 2.0;
        }

        let (result, outbox, _) = step(&vertex, &state(Phase::Finalize, 0), vec![]).await;
        assert!(result.unwrap().state.is_halted());
        assert_eq!(outbox.len(), 2);

        let reports = vec![FlowMessage::FlowReport {
            from: VertexId::new("n/s"),
            flow: 3.0,
        }];
        let (result, _, _) = step(&vertex, &state(Phase::Finalize, 1), reports).await;
        assert!(result.unwrap().state.is_completed());

        let output = vertex.output().unwrap();
        assert_eq!(output["e/sa/reverse"], 0.0);
        assert_eq!(output["e/at"], 2.0);
    }

    #[tokio::test]
    async fn test_relabel_without_residual_edge_warns() {
        let vertex = FlowVertex::new(
            VertexId::new("n/a"),
            vec![edge("n/t", "e/at", 0.0)],
            params(),
            Arc::new(FlowAccumulator::Native),
        );
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();
        vertex.lock().excess = 1.0;

        let (result, _, reports) = step(&vertex, &state(Phase::Relabel, 0), vec![]).await;
        assert_eq!(result.unwrap().update.relabels, 0);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].level, ReportLevel::Warn);
        assert_eq!(reports[0].annotations["phase"], "relabel-phase");
    }

    #[tokio::test]
    async fn test_unexpected_message_is_rejected() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();
        let (result, _, _) = step(&vertex, &state(Phase::FetchLabel, 0), vec![push_from("n/s", 1.0)]).await;
        assert!(matches!(result, Err(PregelError::VertexError { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let vertex = middle_vertex();
        step(&vertex, &state(Phase::Init, 0), vec![]).await.0.unwrap();
        step(&vertex, &state(Phase::Push, 0), vec![push_from("n/s", 5.0)]).await.0.unwrap();
        let snapshot = vertex.snapshot().unwrap();

        let fresh = middle_vertex();
        fresh.restore(&snapshot).unwrap();
        assert_eq!(fresh.value(), vertex.value());
        assert!(fresh.restore(&serde_json::json!("nope")).is_err());

        let input = FlowInput {
            sender: "n/s".into(),
            sender_name: "s".into(),
            additional_flow: 1.0,
        };
        assert_eq!(FlowMessage::Push(input), push_from("n/s", 1.0));
    }
}
