//! Submitted program specifications
//!
//! A program declares its accumulators, custom accumulator programs and
//! phases. Phases are executed by the built-in push-relabel state machine,
//! so a valid program names exactly its six phases and carries no phase
//! programs of its own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::accumulator::{
    AccumulatorSpec, AccumulatorType, CustomAccumulator, CustomAccumulatorSpec, FlowAccumulator, ValueType,
    FLOW_ACCUMULATOR,
};
use crate::expr::{EvalError, Expr, Interpreter};
use crate::push_relabel::{FlowState, Phase};

/// Vertex accumulator holding the residual edges
pub const FLOW: &str = "flow";
/// Vertex accumulator holding the height
pub const LABEL: &str = "label";
/// Vertex accumulator holding the excess flow
pub const EXCESS: &str = "excess";

#[derive(Debug, Error, PartialEq)]
pub enum ProgramError {
    #[error("resultField must not be empty")]
    EmptyResultField,

    #[error("maxGSS must be positive")]
    InvalidMaxGss,

    #[error("Vertex accumulator {name} missing or not {expected}")]
    Accumulator { name: String, expected: &'static str },

    #[error("Global accumulator {name} must be {expected}")]
    GlobalAccumulator { name: String, expected: &'static str },

    #[error("Unknown {scope} accumulator {name}")]
    UnknownAccumulator { scope: &'static str, name: String },

    #[error("Accumulator {accumulator} uses unknown custom type {custom_type}")]
    UnknownCustomType { accumulator: String, custom_type: String },

    #[error("Expected phases {expected:?}, found {found:?}")]
    Phases { expected: Vec<String>, found: Vec<String> },

    #[error("Phase {0} carries programs, which are not supported")]
    PhaseProgram(String),

    #[error("Custom accumulator {accumulator}: {program} is invalid: {source}")]
    InvalidProgram {
        accumulator: String,
        program: &'static str,
        #[source]
        source: EvalError,
    },
}

/// One declared phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_program: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_program: Option<Expr>,
}

impl PhaseSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_program: None,
            update_program: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSpec {
    /// Vertex attribute receiving each vertex's finalized output
    pub result_field: String,
    #[serde(rename = "maxGSS")]
    pub max_gss: usize,
    #[serde(default)]
    pub global_accumulators: BTreeMap<String, AccumulatorSpec>,
    #[serde(default)]
    pub vertex_accumulators: BTreeMap<String, AccumulatorSpec>,
    #[serde(default)]
    pub custom_accumulators: BTreeMap<String, CustomAccumulatorSpec>,
    pub phases: Vec<PhaseSpec>,
}

impl ProgramSpec {
    pub fn validate(&self, interpreter: &Interpreter) -> Result<(), ProgramError> {
        if self.result_field.trim().is_empty() {
            return Err(ProgramError::EmptyResultField);
        }
        if self.max_gss == 0 {
            return Err(ProgramError::InvalidMaxGss);
        }

        match self.vertex_accumulators.get(FLOW) {
            Some(spec) if spec.accumulator_type == AccumulatorType::Custom && spec.custom_type.is_some() => {}
            _ => {
                return Err(ProgramError::Accumulator {
                    name: FLOW.into(),
                    expected: "a custom accumulator",
                })
            }
        }
        match self.vertex_accumulators.get(LABEL) {
            Some(spec) if spec.accumulator_type == AccumulatorType::Max && spec.value_type == ValueType::Ints => {}
            _ => {
                return Err(ProgramError::Accumulator {
                    name: LABEL.into(),
                    expected: "a max accumulator over ints",
                })
            }
        }

        if let Some(custom_type) = self.vertex_accumulators.get(FLOW).and_then(|spec| spec.custom_type.as_ref()) {
            if !self.custom_accumulators.contains_key(custom_type) && custom_type != FLOW_ACCUMULATOR {
                return Err(ProgramError::UnknownCustomType {
                    accumulator: FLOW.into(),
                    custom_type: custom_type.clone(),
                });
            }
        }
        for (name, spec) in &self.vertex_accumulators {
            match name.as_str() {
                FLOW | LABEL => {}
                EXCESS if spec.accumulator_type == AccumulatorType::Sum && spec.value_type == ValueType::Doubles => {}
                EXCESS => {
                    return Err(ProgramError::Accumulator {
                        name: EXCESS.into(),
                        expected: "a sum accumulator over doubles",
                    })
                }
                _ => {
                    return Err(ProgramError::UnknownAccumulator {
                        scope: "vertex",
                        name: name.clone(),
                    })
                }
            }
        }

        // Globals are the master's counters, read back by name
        for (name, spec) in &self.global_accumulators {
            if !FlowState::GLOBALS.contains(&name.as_str()) {
                return Err(ProgramError::UnknownAccumulator {
                    scope: "global",
                    name: name.clone(),
                });
            }
            if spec.accumulator_type != AccumulatorType::Sum || spec.value_type != ValueType::Ints {
                return Err(ProgramError::GlobalAccumulator {
                    name: name.clone(),
                    expected: "a sum accumulator over ints",
                });
            }
        }

        let found: Vec<String> = self.phases.iter().map(|phase| phase.name.clone()).collect();
        let expected: Vec<String> = Phase::PROGRAM.iter().map(|phase| phase.name().to_string()).collect();
        if found != expected {
            return Err(ProgramError::Phases { expected, found });
        }
        if let Some(phase) = self
            .phases
            .iter()
            .find(|phase| phase.init_program.is_some() || phase.update_program.is_some())
        {
            return Err(ProgramError::PhaseProgram(phase.name.clone()));
        }

        for (name, spec) in &self.custom_accumulators {
            spec.check(interpreter)
                .map_err(|(program, source)| ProgramError::InvalidProgram {
                    accumulator: name.clone(),
                    program,
                    source,
                })?;
        }
        Ok(())
    }

    /// Backend of the `flow` accumulator.
    ///
    /// The custom type resolves against the submitted programs first, then
    /// against the built-in native implementation.
    pub fn flow_accumulator(&self, interpreter: &Interpreter) -> Result<FlowAccumulator, ProgramError> {
        let custom_type = self
            .vertex_accumulators
            .get(FLOW)
            .and_then(|spec| spec.custom_type.clone())
            .ok_or_else(|| ProgramError::Accumulator {
                name: FLOW.into(),
                expected: "a custom accumulator",
            })?;

        if let Some(spec) = self.custom_accumulators.get(&custom_type) {
            let accumulator = CustomAccumulator::new(spec.clone()).with_interpreter(interpreter.clone());
            return Ok(FlowAccumulator::Program(accumulator));
        }
        if custom_type == FLOW_ACCUMULATOR {
            return Ok(FlowAccumulator::Native);
        }
        Err(ProgramError::UnknownCustomType {
            accumulator: FLOW.into(),
            custom_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push_relabel::air_program;
    use serde_json::json;

    fn interpreter() -> Interpreter {
        Interpreter::default()
    }

    #[test]
    fn test_canonical_programs_validate() {
        for with_programs in [true, false] {
            let program = air_program("flow", 1000, with_programs).unwrap();
            program.validate(&interpreter()).unwrap();
        }
    }

    #[test]
    fn test_wire_format() {
        let program = air_program("maxflow", 50, false).unwrap();
        let json = serde_json::to_value(&program).unwrap();
        assert_eq!(json["maxGSS"], 50);
        assert_eq!(json["resultField"], "maxflow");
        assert_eq!(json["vertexAccumulators"]["label"], json!({"accumulatorType": "max", "valueType": "ints"}));
        assert_eq!(json["phases"][0], json!({"name": "init-phase"}));

        let back: ProgramSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, program);
    }

    #[test]
    fn test_validation_failures() {
        let base = air_program("flow", 10, true).unwrap();

        let mut program = base.clone();
        program.result_field = " ".into();
        assert_eq!(program.validate(&interpreter()), Err(ProgramError::EmptyResultField));

        let mut program = base.clone();
        program.max_gss = 0;
        assert_eq!(program.validate(&interpreter()), Err(ProgramError::InvalidMaxGss));

        let mut program = base.clone();
        program.vertex_accumulators.remove(LABEL);
        assert!(matches!(program.validate(&interpreter()), Err(ProgramError::Accumulator { .. })));

        let mut program = base.clone();
        program.phases.swap(1, 2);
        assert!(matches!(program.validate(&interpreter()), Err(ProgramError::Phases { .. })));

        let mut program = base.clone();
        program.phases[3].update_program = Some(Expr::Literal(json!(1)));
        assert_eq!(
            program.validate(&interpreter()),
            Err(ProgramError::PhaseProgram("send-label-phase".into()))
        );

        let mut program = base.clone();
        program
            .vertex_accumulators
            .insert(FLOW.into(), AccumulatorSpec::custom("mystery"));
        assert!(matches!(
            program.validate(&interpreter()),
            Err(ProgramError::UnknownCustomType { .. })
        ));

        let mut program = base;
        let flow = program.custom_accumulators.get_mut(FLOW_ACCUMULATOR).unwrap();
        flow.finalize_program = Some(Expr::parse(&json!(["frobnicate", 1])).unwrap());
        match program.validate(&interpreter()) {
            Err(ProgramError::InvalidProgram { program, source, .. }) => {
                assert_eq!(program, "finalizeProgram");
                assert!(matches!(source, EvalError::UnknownFunction(_)));
            }
            other => panic!("Wrong result: {:?}", other),
        }
    }

    #[test]
    fn test_declared_accumulators_must_be_known() {
        let base = air_program("flow", 10, false).unwrap();

        let mut program = base.clone();
        program
            .global_accumulators
            .insert("pushes".into(), AccumulatorSpec::new(AccumulatorType::Min, ValueType::Ints));
        assert_eq!(
            program.validate(&interpreter()),
            Err(ProgramError::GlobalAccumulator {
                name: "pushes".into(),
                expected: "a sum accumulator over ints",
            })
        );

        let mut program = base.clone();
        program
            .global_accumulators
            .insert("pushes".into(), AccumulatorSpec::custom(FLOW_ACCUMULATOR));
        assert!(matches!(
            program.validate(&interpreter()),
            Err(ProgramError::GlobalAccumulator { .. })
        ));

        let mut program = base.clone();
        program
            .global_accumulators
            .insert("saturated".into(), AccumulatorSpec::new(AccumulatorType::Sum, ValueType::Ints));
        assert_eq!(
            program.validate(&interpreter()),
            Err(ProgramError::UnknownAccumulator {
                scope: "global",
                name: "saturated".into(),
            })
        );

        let mut program = base.clone();
        program
            .vertex_accumulators
            .insert("extra".into(), AccumulatorSpec::new(AccumulatorType::Store, ValueType::Any));
        assert!(matches!(
            program.validate(&interpreter()),
            Err(ProgramError::UnknownAccumulator { scope: "vertex", .. })
        ));

        let mut program = base.clone();
        program
            .vertex_accumulators
            .insert(EXCESS.into(), AccumulatorSpec::new(AccumulatorType::Max, ValueType::Ints));
        assert!(matches!(program.validate(&interpreter()), Err(ProgramError::Accumulator { .. })));

        // Globals and excess are optional
        let mut program = base;
        program.global_accumulators.clear();
        program.vertex_accumulators.remove(EXCESS);
        assert!(program.validate(&interpreter()).is_ok());
    }

    #[test]
    fn test_flow_accumulator_resolution() {
        let submitted = air_program("flow", 10, true).unwrap();
        assert!(!submitted.flow_accumulator(&interpreter()).unwrap().is_native());

        let native = air_program("flow", 10, false).unwrap();
        assert!(native.flow_accumulator(&interpreter()).unwrap().is_native());

        let mut unknown = native;
        unknown
            .vertex_accumulators
            .insert(FLOW.into(), AccumulatorSpec::custom("otherAccumulator"));
        assert!(matches!(
            unknown.flow_accumulator(&interpreter()),
            Err(ProgramError::UnknownCustomType { .. })
        ));
    }
}
