//! Program-backed accumulators
//!
//! Each operation is an expression evaluated over JSON values. Bindings:
//!
//! | program            | variables            |
//! |--------------------|----------------------|
//! | `updateProgram`    | `current`, `input`   |
//! | `clearProgram`     | none                 |
//! | `getProgram`       | `current`            |
//! | `setProgram`       | `current`, `value`   |
//! | `finalizeProgram`  | `current`            |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::expr::{Env, EvalError, Expr, Interpreter, Value};

/// The programs of a custom accumulator type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAccumulatorSpec {
    pub update_program: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear_program: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_program: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_program: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_program: Option<Expr>,
}

impl CustomAccumulatorSpec {
    /// All present programs, labelled by field name
    pub fn programs(&self) -> Vec<(&'static str, &Expr)> {
        let mut programs = vec![("updateProgram", &self.update_program)];
        let optional = [
            ("clearProgram", &self.clear_program),
            ("getProgram", &self.get_program),
            ("setProgram", &self.set_program),
            ("finalizeProgram", &self.finalize_program),
        ];
        programs.extend(
            optional
                .into_iter()
                .filter_map(|(name, program)| program.as_ref().map(|p| (name, p))),
        );
        programs
    }

    /// Statically check every program against the built-in table
    pub fn check(&self, interpreter: &Interpreter) -> Result<(), (&'static str, EvalError)> {
        for (name, program) in self.programs() {
            interpreter.check(program).map_err(|e| (name, e))?;
        }
        Ok(())
    }
}

/// An accumulator evaluating a [`CustomAccumulatorSpec`]
///
/// Missing programs fall back to identity behaviour: `clear` yields `null`,
/// `get` and `finalize` return the current value, `set` stores the value.
#[derive(Debug, Clone)]
pub struct CustomAccumulator {
    spec: Arc<CustomAccumulatorSpec>,
    interpreter: Interpreter,
}

impl CustomAccumulator {
    pub fn new(spec: CustomAccumulatorSpec) -> Self {
        Self {
            spec: Arc::new(spec),
            interpreter: Interpreter::default(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn spec(&self) -> &CustomAccumulatorSpec {
        &self.spec
    }

    pub fn update(
        &self,
        current: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, EvalError> {
        self.run(
            &self.spec.update_program,
            [("current", current), ("input", input)],
        )
    }

    pub fn clear(&self) -> Result<serde_json::Value, EvalError> {
        match &self.spec.clear_program {
            Some(program) => self.run(program, []),
            None => Ok(serde_json::Value::Null),
        }
    }

    pub fn get(&self, current: &serde_json::Value) -> Result<serde_json::Value, EvalError> {
        match &self.spec.get_program {
            Some(program) => self.run(program, [("current", current)]),
            None => Ok(current.clone()),
        }
    }

    pub fn set(
        &self,
        current: &serde_json::Value,
        value: &serde_json::Value,
    ) -> Result<serde_json::Value, EvalError> {
        match &self.spec.set_program {
            Some(program) => self.run(program, [("current", current), ("value", value)]),
            None => Ok(value.clone()),
        }
    }

    pub fn finalize(&self, current: &serde_json::Value) -> Result<serde_json::Value, EvalError> {
        match &self.spec.finalize_program {
            Some(program) => self.run(program, [("current", current)]),
            None => Ok(current.clone()),
        }
    }

    fn run<const N: usize>(
        &self,
        program: &Expr,
        bindings: [(&str, &serde_json::Value); N],
    ) -> Result<serde_json::Value, EvalError> {
        let vars: HashMap<String, Value> = bindings
            .into_iter()
            .map(|(name, json)| (name.to_string(), Value::from(json)))
            .collect();
        let env = Env::new().extend(vars);
        Ok(self.interpreter.eval(program, &env)?.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> CustomAccumulator {
        let spec: CustomAccumulatorSpec = serde_json::from_value(json!({
            "updateProgram": ["+", ["var-ref", "current"], ["var-ref", "input"]],
            "clearProgram": 0,
            "finalizeProgram": ["dict", "total", ["var-ref", "current"]]
        }))
        .unwrap();
        CustomAccumulator::new(spec)
    }

    #[test]
    fn test_update_and_finalize() {
        let acc = counter();
        let mut value = acc.clear().unwrap();
        for input in [json!(2), json!(3)] {
            value = acc.update(&value, &input).unwrap();
        }
        assert_eq!(value, json!(5));
        assert_eq!(acc.finalize(&value).unwrap(), json!({"total": 5}));
    }

    #[test]
    fn test_missing_programs_are_identity() {
        let acc = counter();
        assert_eq!(acc.get(&json!(7)).unwrap(), json!(7));
        assert_eq!(acc.set(&json!(7), &json!(9)).unwrap(), json!(9));
    }

    #[test]
    fn test_update_errors_propagate() {
        let acc = counter();
        let err = acc.update(&json!("text"), &json!(1)).unwrap_err();
        assert!(matches!(err, EvalError::TypeMismatch { .. }));
    }

    #[test]
    fn test_check_names_failing_program() {
        let spec: CustomAccumulatorSpec = serde_json::from_value(json!({
            "updateProgram": ["var-ref", "input"],
            "finalizeProgram": ["eval", "current"]
        }))
        .unwrap();
        let (program, err) = spec.check(&Interpreter::new()).unwrap_err();
        assert_eq!(program, "finalizeProgram");
        assert_eq!(err, EvalError::UnknownFunction("eval".into()));
    }
}
