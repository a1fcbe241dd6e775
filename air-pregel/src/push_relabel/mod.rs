//! Push-relabel maximum flow as a vertex-centric program
//!
//! The master state walks the phases in [`phase`]; each graph vertex runs a
//! [`FlowVertex`]. When the run ends, every vertex's output maps the ids of
//! its residual edges to their finalized flow.

pub mod phase;
pub mod vertex;

pub use phase::{FlowState, FlowTotals, Phase, PhaseReport};
pub use vertex::{build_vertices, FlowParams, FlowValue, FlowVertex};

use std::collections::{BTreeMap, HashMap};

use crate::accumulator::{
    flow_accumulator_spec, AccumulatorError, AccumulatorSpec, AccumulatorType, ValueType, FLOW_ACCUMULATOR,
};
use crate::graph::Graph;
use crate::pregel::VertexId;
use crate::program::{PhaseSpec, ProgramSpec, EXCESS, FLOW, LABEL};

/// Name under which the engine accepts this program
pub const ALGORITHM: &str = "air";

/// Default superstep budget
pub const DEFAULT_MAX_GSS: usize = 1000;

/// The push-relabel program.
///
/// With `with_programs`, the flow accumulator ships its canonical
/// expression programs; otherwise the engine falls back to the native one.
pub fn air_program(
    result_field: impl Into<String>,
    max_gss: usize,
    with_programs: bool,
) -> Result<ProgramSpec, AccumulatorError> {
    let vertex_accumulators = BTreeMap::from([
        (FLOW.to_string(), AccumulatorSpec::custom(FLOW_ACCUMULATOR)),
        (LABEL.to_string(), AccumulatorSpec::new(AccumulatorType::Max, ValueType::Ints)),
        (EXCESS.to_string(), AccumulatorSpec::new(AccumulatorType::Sum, ValueType::Doubles)),
    ]);

    let global_accumulators = FlowState::GLOBALS
        .iter()
        .map(|name| (name.to_string(), AccumulatorSpec::new(AccumulatorType::Sum, ValueType::Ints)))
        .collect();

    let mut custom_accumulators = BTreeMap::new();
    if with_programs {
        custom_accumulators.insert(FLOW_ACCUMULATOR.to_string(), flow_accumulator_spec()?);
    }

    Ok(ProgramSpec {
        result_field: result_field.into(),
        max_gss,
        global_accumulators,
        vertex_accumulators,
        custom_accumulators,
        phases: Phase::PROGRAM.iter().map(|phase| PhaseSpec::named(phase.name())).collect(),
    })
}

/// Sum of finalized flows on residual edges pointing at `sink`
pub fn max_flow(graph: &Graph, sink: &VertexId, outputs: &HashMap<VertexId, serde_json::Value>) -> f64 {
    let targets = graph.residual_targets();
    outputs
        .values()
        .filter_map(serde_json::Value::as_object)
        .flat_map(|output| output.iter())
        .filter(|(edge, _)| targets.get(edge.as_str()) == Some(sink))
        .filter_map(|(_, flow)| flow.as_f64())
        .sum()
}
