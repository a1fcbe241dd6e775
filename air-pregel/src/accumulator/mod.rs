//! Vertex accumulators
//!
//! An accumulator is a per-vertex state cell with merge (`update`), reset
//! (`clear`), read/write (`get`/`set`) and externalization (`finalize`).
//! Built-in kinds merge scalars; custom kinds run expression programs.

pub mod custom;
pub mod flow;
pub mod label;

pub use custom::{CustomAccumulator, CustomAccumulatorSpec};
pub use flow::{
    flow_accumulator_spec, FlowAccumulator, FlowEntry, FlowInput, FlowMap, FLOW_ACCUMULATOR,
    FLOW_EPSILON,
};
pub use label::Label;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::EvalError;

/// Merge behaviour of an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulatorType {
    Store,
    Min,
    Max,
    Sum,
    Custom,
}

/// Value domain of an accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Ints,
    Doubles,
    Bool,
    #[default]
    Any,
}

/// Declaration of a global or vertex accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorSpec {
    pub accumulator_type: AccumulatorType,
    #[serde(default)]
    pub value_type: ValueType,
    /// Name of the custom accumulator, required for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type: Option<String>,
}

impl AccumulatorSpec {
    pub fn new(accumulator_type: AccumulatorType, value_type: ValueType) -> Self {
        Self {
            accumulator_type,
            value_type,
            custom_type: None,
        }
    }

    /// A `custom` accumulator of the named type
    pub fn custom(custom_type: impl Into<String>) -> Self {
        Self {
            accumulator_type: AccumulatorType::Custom,
            value_type: ValueType::Any,
            custom_type: Some(custom_type.into()),
        }
    }
}

/// Accumulator failures
#[derive(Debug, Error)]
pub enum AccumulatorError {
    /// An input named a neighbour the accumulator has no entry for
    #[error("No flow entry for sender {sender}")]
    MissingEntry { sender: String },

    /// A program failed to evaluate
    #[error("Accumulator program failed: {0}")]
    Eval(#[from] EvalError),

    /// A program produced a value of the wrong shape
    #[error("Accumulator value has the wrong shape: {0}")]
    Decode(String),

    /// The custom type is neither submitted nor built in
    #[error("Unknown custom accumulator type: {0}")]
    UnknownCustomType(String),
}

impl AccumulatorError {
    pub fn decode(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
