//! Expression trees and their JSON list syntax
//!
//! Programs are written as nested JSON lists whose head names a special
//! form or a built-in function:
//!
//! ```text
//! ["let", [["entry", ["attrib-ref", ["var-ref", "current"], "a"]]],
//!   ["if", [["is-null", ["var-ref", "entry"]], ["error", "missing"]],
//!          [true, ["attrib-ref", ["var-ref", "entry"], "flow"]]]]
//! ```
//!
//! Scalars and JSON objects are literals. `["quote", x]` makes any JSON a
//! literal, including lists.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::EvalError;

/// An expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Expr {
    /// Constant JSON data
    Literal(serde_json::Value),
    /// Variable lookup in the current scope
    Var(String),
    /// `object[key]`, `null` when absent
    Attr { object: Box<Expr>, key: Box<Expr> },
    /// Built-in function call
    Call { func: String, args: Vec<Expr> },
    /// Sequential bindings, each visible to the following ones and the body
    Let {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    /// Two-way conditional; cond-style clauses are folded into a chain
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Anonymous function capturing its defining scope
    Lambda { params: Vec<String>, body: Arc<Expr> },
    /// Evaluate in order, yield the last value
    Seq(Vec<Expr>),
}

impl Expr {
    /// Parse an expression from its JSON list syntax
    pub fn parse(json: &serde_json::Value) -> Result<Expr, EvalError> {
        use serde_json::Value as Json;

        let items = match json {
            Json::Array(items) => items,
            other => return Ok(Expr::Literal(other.clone())),
        };

        let (head, rest) = items
            .split_first()
            .ok_or_else(|| EvalError::parse("empty list form"))?;
        let head = head
            .as_str()
            .ok_or_else(|| EvalError::parse(format!("form head must be a string, got {}", head)))?;

        match head {
            "quote" => match rest {
                [value] => Ok(Expr::Literal(value.clone())),
                _ => Err(EvalError::parse("quote takes exactly one argument")),
            },
            "var-ref" => match rest {
                [Json::String(name)] => Ok(Expr::Var(name.clone())),
                _ => Err(EvalError::parse("var-ref takes one variable name")),
            },
            "attrib-ref" => match rest {
                [object, key] => Ok(Expr::Attr {
                    object: Box::new(Expr::parse(object)?),
                    key: Box::new(Expr::parse(key)?),
                }),
                _ => Err(EvalError::parse("attrib-ref takes an object and a key")),
            },
            "let" => Self::parse_let(rest),
            "if" => Self::parse_if(rest),
            "lambda" => Self::parse_lambda(rest),
            "seq" => Ok(Expr::Seq(
                rest.iter().map(Expr::parse).collect::<Result<_, _>>()?,
            )),
            func => Ok(Expr::Call {
                func: func.to_string(),
                args: rest.iter().map(Expr::parse).collect::<Result<_, _>>()?,
            }),
        }
    }

    fn parse_let(rest: &[serde_json::Value]) -> Result<Expr, EvalError> {
        let (bindings, body) = rest
            .split_first()
            .ok_or_else(|| EvalError::parse("let needs a binding list"))?;
        let bindings = bindings
            .as_array()
            .ok_or_else(|| EvalError::parse("let bindings must be a list"))?;

        let mut parsed = Vec::with_capacity(bindings.len());
        for binding in bindings {
            match binding.as_array().map(Vec::as_slice) {
                Some([serde_json::Value::String(name), value]) => {
                    parsed.push((name.clone(), Expr::parse(value)?));
                }
                _ => return Err(EvalError::parse(format!("malformed let binding {}", binding))),
            }
        }

        Ok(Expr::Let {
            bindings: parsed,
            body: Box::new(Self::parse_body(body)?),
        })
    }

    fn parse_if(clauses: &[serde_json::Value]) -> Result<Expr, EvalError> {
        let mut chain = Expr::Literal(serde_json::Value::Null);
        for clause in clauses.iter().rev() {
            match clause.as_array().map(Vec::as_slice) {
                Some([cond, then]) => {
                    chain = Expr::If {
                        cond: Box::new(Expr::parse(cond)?),
                        then: Box::new(Expr::parse(then)?),
                        otherwise: Box::new(chain),
                    };
                }
                _ => return Err(EvalError::parse(format!("malformed if clause {}", clause))),
            }
        }
        Ok(chain)
    }

    fn parse_lambda(rest: &[serde_json::Value]) -> Result<Expr, EvalError> {
        let (params, body) = rest
            .split_first()
            .ok_or_else(|| EvalError::parse("lambda needs a parameter list"))?;
        let params = params
            .as_array()
            .ok_or_else(|| EvalError::parse("lambda parameters must be a list"))?
            .iter()
            .map(|p| {
                p.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| EvalError::parse(format!("lambda parameter must be a string, got {}", p)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Expr::Lambda {
            params,
            body: Arc::new(Self::parse_body(body)?),
        })
    }

    fn parse_body(body: &[serde_json::Value]) -> Result<Expr, EvalError> {
        match body {
            [] => Err(EvalError::parse("missing body")),
            [single] => Expr::parse(single),
            many => Ok(Expr::Seq(
                many.iter().map(Expr::parse).collect::<Result<_, _>>()?,
            )),
        }
    }

    /// Render back into JSON list syntax
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as Json};

        match self {
            Expr::Literal(value) => match value {
                Json::Array(_) => json!(["quote", value]),
                other => other.clone(),
            },
            Expr::Var(name) => json!(["var-ref", name]),
            Expr::Attr { object, key } => json!(["attrib-ref", object.to_json(), key.to_json()]),
            Expr::Call { func, args } => {
                let mut items = vec![Json::String(func.clone())];
                items.extend(args.iter().map(Expr::to_json));
                Json::Array(items)
            }
            Expr::Let { bindings, body } => {
                let bindings: Vec<Json> = bindings
                    .iter()
                    .map(|(name, value)| json!([name, value.to_json()]))
                    .collect();
                json!(["let", bindings, body.to_json()])
            }
            Expr::If { .. } => {
                let mut items = vec![Json::String("if".into())];
                let mut current = self;
                while let Expr::If { cond, then, otherwise } = current {
                    items.push(json!([cond.to_json(), then.to_json()]));
                    current = &**otherwise;
                }
                if *current != Expr::Literal(Json::Null) {
                    items.push(json!([true, current.to_json()]));
                }
                Json::Array(items)
            }
            Expr::Lambda { params, body } => json!(["lambda", params, body.to_json()]),
            Expr::Seq(items) => {
                let mut out = vec![Json::String("seq".into())];
                out.extend(items.iter().map(Expr::to_json));
                Json::Array(out)
            }
        }
    }

    /// Visit every built-in call name in the tree
    pub fn for_each_call<'a>(&'a self, f: &mut dyn FnMut(&'a str)) {
        match self {
            Expr::Literal(_) | Expr::Var(_) => {}
            Expr::Attr { object, key } => {
                object.for_each_call(f);
                key.for_each_call(f);
            }
            Expr::Call { func, args } => {
                f(func);
                for arg in args {
                    arg.for_each_call(f);
                }
            }
            Expr::Let { bindings, body } => {
                for (_, value) in bindings {
                    value.for_each_call(f);
                }
                body.for_each_call(f);
            }
            Expr::If { cond, then, otherwise } => {
                cond.for_each_call(f);
                then.for_each_call(f);
                otherwise.for_each_call(f);
            }
            Expr::Lambda { body, .. } => body.for_each_call(f),
            Expr::Seq(items) => {
                for item in items {
                    item.for_each_call(f);
                }
            }
        }
    }
}

impl TryFrom<serde_json::Value> for Expr {
    type Error = EvalError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        Expr::parse(&json)
    }
}

impl From<Expr> for serde_json::Value {
    fn from(expr: Expr) -> Self {
        expr.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_are_literals() {
        assert_eq!(Expr::parse(&json!(3)).unwrap(), Expr::Literal(json!(3)));
        assert_eq!(Expr::parse(&json!("flow")).unwrap(), Expr::Literal(json!("flow")));
        assert_eq!(
            Expr::parse(&json!({"a": 1})).unwrap(),
            Expr::Literal(json!({"a": 1}))
        );
    }

    #[test]
    fn test_parse_call_with_nested_forms() {
        let expr = Expr::parse(&json!(["+", ["var-ref", "x"], ["attrib-ref", ["var-ref", "d"], "k"]])).unwrap();
        match expr {
            Expr::Call { func, args } => {
                assert_eq!(func, "+");
                assert_eq!(args[0], Expr::Var("x".into()));
                assert!(matches!(args[1], Expr::Attr { .. }));
            }
            other => panic!("Wrong expression: {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_folds_clauses() {
        let expr = Expr::parse(&json!(["if", [false, 1], [true, 2]])).unwrap();
        match expr {
            Expr::If { otherwise, .. } => assert!(matches!(*otherwise, Expr::If { .. })),
            other => panic!("Wrong expression: {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse(&json!([])).is_err());
        assert!(Expr::parse(&json!([1, 2])).is_err());
        assert!(Expr::parse(&json!(["let", [["x"]], 1])).is_err());
        assert!(Expr::parse(&json!(["lambda", [1], 1])).is_err());
        assert!(Expr::parse(&json!(["var-ref"])).is_err());
    }

    #[test]
    fn test_serde_uses_list_syntax() {
        let source = json!(["let", [["x", 2]], ["*", ["var-ref", "x"], ["quote", [1]]]]);
        let expr: Expr = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(serde_json::to_value(&expr).unwrap(), source);
    }

    #[test]
    fn test_for_each_call_collects_functions() {
        let expr = Expr::parse(&json!(["map", ["lambda", ["x"], ["+", ["var-ref", "x"], 1]], ["list", 1]])).unwrap();
        let mut calls = Vec::new();
        expr.for_each_call(&mut |name| calls.push(name));
        assert_eq!(calls, vec!["map", "+", "list"]);
    }
}
