//! Flow accumulator
//!
//! Per-vertex residual state of every outgoing residual edge, keyed by the
//! neighbour's vertex id. `flow` counts what this vertex pushed along the
//! edge, `capacity` grows by what the neighbour pushed back, so the residual
//! capacity is `capacity - flow`.
//!
//! Two backends share the same semantics: a native one and one running the
//! canonical expression programs from [`flow_accumulator_spec`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::custom::{CustomAccumulator, CustomAccumulatorSpec};
use super::AccumulatorError;

/// Name of the flow accumulator custom type
pub const FLOW_ACCUMULATOR: &str = "flowAccumulator";

/// Amounts at or below this are treated as zero
pub const FLOW_EPSILON: f64 = 1e-9;

/// State of one residual edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub flow: f64,
    pub capacity: f64,
    /// Id of the edge this entry tracks
    pub id: String,
}

impl FlowEntry {
    pub fn new(id: impl Into<String>, capacity: f64) -> Self {
        Self {
            flow: 0.0,
            capacity,
            id: id.into(),
        }
    }

    pub fn residual(&self) -> f64 {
        self.capacity - self.flow
    }

    pub fn is_residual(&self) -> bool {
        self.residual() > FLOW_EPSILON
    }
}

/// Neighbour vertex id to residual edge state
pub type FlowMap = BTreeMap<String, FlowEntry>;

/// A push notification, the input of `update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInput {
    /// Vertex id of the pusher
    pub sender: String,
    /// Key of the pusher
    pub sender_name: String,
    pub additional_flow: f64,
}

/// Flow accumulator backend
#[derive(Debug, Clone)]
pub enum FlowAccumulator {
    Native,
    Program(CustomAccumulator),
}

impl FlowAccumulator {
    /// The program backend running the canonical programs
    pub fn canonical_program() -> Result<Self, AccumulatorError> {
        Ok(Self::Program(CustomAccumulator::new(flow_accumulator_spec()?)))
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Grow the reverse residual capacity toward the sender.
    ///
    /// The receiver's own `flow` is left unchanged. A sender without an entry
    /// is an error: only known neighbours can push.
    pub fn update(&self, current: &mut FlowMap, input: &FlowInput) -> Result<(), AccumulatorError> {
        match self {
            Self::Native => {
                let entry = current
                    .get_mut(&input.sender)
                    .ok_or_else(|| AccumulatorError::MissingEntry {
                        sender: input.sender.clone(),
                    })?;
                entry.capacity += input.additional_flow;
                Ok(())
            }
            Self::Program(program) => {
                let input = serde_json::to_value(input).map_err(AccumulatorError::decode)?;
                let updated = program.update(&to_json(current)?, &input)?;
                *current = from_json(updated)?;
                Ok(())
            }
        }
    }

    pub fn clear(&self) -> Result<FlowMap, AccumulatorError> {
        match self {
            Self::Native => Ok(FlowMap::new()),
            Self::Program(program) => from_json(program.clear()?),
        }
    }

    pub fn get(&self, current: &FlowMap) -> Result<FlowMap, AccumulatorError> {
        match self {
            Self::Native => Ok(current.clone()),
            Self::Program(program) => from_json(program.get(&to_json(current)?)?),
        }
    }

    pub fn set(&self, current: &FlowMap, value: FlowMap) -> Result<FlowMap, AccumulatorError> {
        match self {
            Self::Native => Ok(value),
            Self::Program(program) => {
                from_json(program.set(&to_json(current)?, &to_json(&value)?)?)
            }
        }
    }

    /// Edge id to flow for every entry
    pub fn finalize(&self, current: &FlowMap) -> Result<BTreeMap<String, f64>, AccumulatorError> {
        match self {
            Self::Native => Ok(current
                .values()
                .map(|entry| (entry.id.clone(), entry.flow))
                .collect()),
            Self::Program(program) => {
                let finalized = program.finalize(&to_json(current)?)?;
                serde_json::from_value(finalized).map_err(AccumulatorError::decode)
            }
        }
    }
}

fn to_json(map: &FlowMap) -> Result<serde_json::Value, AccumulatorError> {
    serde_json::to_value(map).map_err(AccumulatorError::decode)
}

fn from_json(value: serde_json::Value) -> Result<FlowMap, AccumulatorError> {
    serde_json::from_value(value).map_err(AccumulatorError::decode)
}

/// The canonical flow accumulator programs
pub fn flow_accumulator_spec() -> Result<CustomAccumulatorSpec, AccumulatorError> {
    let sender = json!(["attrib-ref", ["var-ref", "input"], "sender"]);
    let entry = json!(["var-ref", "entry"]);

    let update = json!(["let", [["entry", ["attrib-ref", ["var-ref", "current"], sender]]],
        ["if",
            [["is-null", entry], ["error", "flow accumulator has no entry for sender ", sender]],
            [true, ["attrib-set", ["var-ref", "current"], sender,
                ["attrib-set", entry, "capacity",
                    ["+", ["attrib-ref", entry, "capacity"],
                          ["attrib-ref", ["var-ref", "input"], "additionalFlow"]]]]]]]);

    let finalize = json!(["dict-from-pairs",
        ["map",
            ["lambda", ["key", "entry"],
                ["list", ["attrib-ref", entry, "id"], ["attrib-ref", entry, "flow"]]],
            ["var-ref", "current"]]]);

    let spec = json!({
        "updateProgram": update,
        "clearProgram": {},
        "getProgram": ["var-ref", "current"],
        "setProgram": ["var-ref", "value"],
        "finalizeProgram": finalize,
    });

    serde_json::from_value(spec).map_err(AccumulatorError::decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowMap {
        let mut map = FlowMap::new();
        let mut a = FlowEntry::new("edges/sa", 4.0);
        a.flow = 3.0;
        map.insert("nodes/a".into(), a);
        map.insert("nodes/b".into(), FlowEntry::new("edges/sb/reverse", 0.0));
        map
    }

    fn push(sender: &str, amount: f64) -> FlowInput {
        FlowInput {
            sender: sender.into(),
            sender_name: sender.rsplit('/').next().unwrap_or(sender).into(),
            additional_flow: amount,
        }
    }

    fn backends() -> [FlowAccumulator; 2] {
        [FlowAccumulator::Native, FlowAccumulator::canonical_program().unwrap()]
    }

    #[test]
    fn test_update_grows_capacity_only() {
        for acc in backends() {
            let mut map = sample();
            acc.update(&mut map, &push("nodes/a", 2.0)).unwrap();
            acc.update(&mut map, &push("nodes/b", 1.5)).unwrap();
            assert_eq!(map["nodes/a"].capacity, 6.0);
            assert_eq!(map["nodes/a"].flow, 3.0);
            assert_eq!(map["nodes/b"].capacity, 1.5);
            assert_eq!(map["nodes/b"].flow, 0.0);
            assert_eq!(map["nodes/b"].id, "edges/sb/reverse");
        }
    }

    #[test]
    fn test_capacity_is_monotonic() {
        for acc in backends() {
            let mut map = sample();
            let mut last = map["nodes/a"].capacity;
            for amount in [0.0, 1.0, 0.5] {
                acc.update(&mut map, &push("nodes/a", amount)).unwrap();
                assert!(map["nodes/a"].capacity >= last);
                last = map["nodes/a"].capacity;
            }
        }
    }

    #[test]
    fn test_missing_sender_fails_loudly() {
        let mut map = sample();
        let err = FlowAccumulator::Native
            .update(&mut map, &push("nodes/z", 1.0))
            .unwrap_err();
        assert!(matches!(err, AccumulatorError::MissingEntry { ref sender } if sender == "nodes/z"));

        let err = FlowAccumulator::canonical_program()
            .unwrap()
            .update(&mut map, &push("nodes/z", 1.0))
            .unwrap_err();
        match err {
            AccumulatorError::Eval(crate::expr::EvalError::Raised(msg)) => assert!(msg.contains("nodes/z")),
            other => panic!("Wrong error: {:?}", other),
        }
    }

    #[test]
    fn test_clear_get_set() {
        for acc in backends() {
            assert!(acc.clear().unwrap().is_empty());
            let map = sample();
            assert_eq!(acc.get(&map).unwrap(), map);
            assert_eq!(acc.set(&FlowMap::new(), map.clone()).unwrap(), map);
        }
    }

    #[test]
    fn test_finalize_maps_edge_ids_to_flow() {
        for acc in backends() {
            let finalized = acc.finalize(&sample()).unwrap();
            assert_eq!(finalized.len(), 2);
            assert_eq!(finalized["edges/sa"], 3.0);
            assert_eq!(finalized["edges/sb/reverse"], 0.0);
        }
    }

    #[test]
    fn test_flow_input_wire_format() {
        let input = push("nodes/a", 2.0);
        assert_eq!(
            serde_json::to_value(&input).unwrap(),
            json!({"sender": "nodes/a", "senderName": "a", "additionalFlow": 2.0})
        );
    }

    #[test]
    fn test_residual() {
        let map = sample();
        let entry = &map["nodes/a"];
        assert_eq!(entry.residual(), 1.0);
        assert!(entry.is_residual());
        assert!(!FlowEntry::new("e", 0.0).is_residual());
    }
}
