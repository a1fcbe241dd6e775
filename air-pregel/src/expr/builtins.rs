//! Pure built-in functions
//!
//! Every built-in is a function of its evaluated arguments only. There is
//! no access to the host, the clock, or vertex state from here.

use std::collections::BTreeMap;

use super::error::EvalError;
use super::value::Value;

/// Names of built-ins that take closures and are applied by the interpreter
pub const HIGHER_ORDER: &[&str] = &["map", "filter", "reduce"];

/// Names of short-circuiting logical forms
pub const LOGICAL: &[&str] = &["and", "or"];

/// Names of pure built-ins dispatched by [`call`]
pub const PURE: &[&str] = &[
    "+", "-", "*", "/", "==", "!=", "<", "<=", ">", ">=", "not", "min", "max", "abs", "is-null",
    "list", "dict", "attrib-set", "dict-merge", "dict-keys", "dict-from-pairs", "has", "length",
    "nth", "concat", "error", "sum", "to-string",
];

/// Whether `name` is callable from a program
pub fn is_known(name: &str) -> bool {
    PURE.contains(&name) || HIGHER_ORDER.contains(&name) || LOGICAL.contains(&name)
}

/// Dispatch a pure built-in
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match name {
        "+" => Ok(Value::Number(numbers(name, &args)?.iter().sum())),
        "*" => Ok(Value::Number(numbers(name, &args)?.iter().product())),
        "-" => {
            let nums = numbers(name, &args)?;
            match nums.split_first() {
                None => Err(EvalError::arity(name, "at least 1", 0)),
                Some((only, [])) => Ok(Value::Number(-only)),
                Some((first, rest)) => Ok(Value::Number(first - rest.iter().sum::<f64>())),
            }
        }
        "/" => {
            let [a, b] = exact::<2>(name, args)?;
            let (a, b) = (number(name, &a)?, number(name, &b)?);
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Number(a / b))
        }
        "==" => {
            let [a, b] = exact::<2>(name, args)?;
            Ok(Value::Bool(a.equals(&b)))
        }
        "!=" => {
            let [a, b] = exact::<2>(name, args)?;
            Ok(Value::Bool(!a.equals(&b)))
        }
        "<" | "<=" | ">" | ">=" => {
            let [a, b] = exact::<2>(name, args)?;
            let ordering = match (&a, &b) {
                (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => return Err(EvalError::type_mismatch(name, "two numbers or two strings", b.type_name())),
            };
            let holds = match ordering {
                None => false,
                Some(ord) => match name {
                    "<" => ord.is_lt(),
                    "<=" => ord.is_le(),
                    ">" => ord.is_gt(),
                    _ => ord.is_ge(),
                },
            };
            Ok(Value::Bool(holds))
        }
        "not" => {
            let [a] = exact::<1>(name, args)?;
            Ok(Value::Bool(!a.is_truthy()))
        }
        "min" | "max" => {
            let nums = numbers(name, &args)?;
            let first = *nums.first().ok_or_else(|| EvalError::arity(name, "at least 1", 0))?;
            let folded = nums.iter().skip(1).fold(first, |acc, n| {
                if name == "min" {
                    acc.min(*n)
                } else {
                    acc.max(*n)
                }
            });
            Ok(Value::Number(folded))
        }
        "abs" => {
            let [a] = exact::<1>(name, args)?;
            Ok(Value::Number(number(name, &a)?.abs()))
        }
        "is-null" => {
            let [a] = exact::<1>(name, args)?;
            Ok(Value::Bool(a.is_null()))
        }
        "list" => Ok(Value::List(args)),
        "dict" => {
            if args.len() % 2 != 0 {
                return Err(EvalError::arity(name, "an even number", args.len()));
            }
            let mut entries = BTreeMap::new();
            let mut iter = args.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                entries.insert(string(name, key)?, value);
            }
            Ok(Value::Dict(entries))
        }
        "attrib-set" => {
            let [target, key, value] = exact::<3>(name, args)?;
            let mut entries = dict(name, target)?;
            entries.insert(string(name, key)?, value);
            Ok(Value::Dict(entries))
        }
        "dict-merge" => {
            let mut merged = BTreeMap::new();
            for arg in args {
                merged.extend(dict(name, arg)?);
            }
            Ok(Value::Dict(merged))
        }
        "dict-keys" => {
            let [target] = exact::<1>(name, args)?;
            Ok(Value::List(dict(name, target)?.into_keys().map(Value::String).collect()))
        }
        "dict-from-pairs" => {
            let [pairs] = exact::<1>(name, args)?;
            let mut entries = BTreeMap::new();
            for pair in list(name, pairs)? {
                let [key, value] = exact::<2>(name, list(name, pair)?)?;
                entries.insert(string(name, key)?, value);
            }
            Ok(Value::Dict(entries))
        }
        "has" => {
            let [target, key] = exact::<2>(name, args)?;
            let key = string(name, key)?;
            Ok(Value::Bool(dict(name, target)?.contains_key(&key)))
        }
        "length" => {
            let [target] = exact::<1>(name, args)?;
            let len = match &target {
                Value::List(items) => items.len(),
                Value::Dict(entries) => entries.len(),
                Value::String(s) => s.chars().count(),
                other => return Err(EvalError::type_mismatch(name, "list, dict or string", other.type_name())),
            };
            Ok(Value::Number(len as f64))
        }
        "nth" => {
            let [target, index] = exact::<2>(name, args)?;
            let index = number(name, &index)?;
            let items = list(name, target)?;
            if index < 0.0 || index.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.into_iter().nth(index as usize).unwrap_or(Value::Null))
        }
        "concat" => Ok(Value::String(concat(&args))),
        "error" => Err(EvalError::Raised(concat(&args))),
        "sum" => {
            let [items] = exact::<1>(name, args)?;
            let items = list(name, items)?;
            Ok(Value::Number(numbers(name, &items)?.iter().sum()))
        }
        "to-string" => {
            let [a] = exact::<1>(name, args)?;
            Ok(Value::String(a.to_string()))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn concat(args: &[Value]) -> String {
    args.iter().map(Value::to_string).collect()
}

/// Destructure exactly `N` arguments
pub(crate) fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], EvalError> {
    let found = args.len();
    args.try_into()
        .map_err(|_| EvalError::arity(name, N.to_string(), found))
}

pub(crate) fn number(name: &str, value: &Value) -> Result<f64, EvalError> {
    value
        .as_number()
        .ok_or_else(|| EvalError::type_mismatch(name, "number", value.type_name()))
}

fn numbers(name: &str, values: &[Value]) -> Result<Vec<f64>, EvalError> {
    values.iter().map(|v| number(name, v)).collect()
}

fn string(name: &str, value: Value) -> Result<String, EvalError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(EvalError::type_mismatch(name, "string", other.type_name())),
    }
}

pub(crate) fn list(name: &str, value: Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(EvalError::type_mismatch(name, "list", other.type_name())),
    }
}

fn dict(name: &str, value: Value) -> Result<BTreeMap<String, Value>, EvalError> {
    match value {
        Value::Dict(entries) => Ok(entries),
        other => Err(EvalError::type_mismatch(name, "dict", other.type_name())),
    }
}
