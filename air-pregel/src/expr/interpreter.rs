//! Tree-walking interpreter
//!
//! Scopes are immutable linked frames, so closures capture their defining
//! scope by cloning an `Arc`. Evaluation has no side effects; the only way
//! out besides a value is an [`EvalError`].

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::Expr;
use super::builtins;
use super::error::EvalError;
use super::value::{Closure, Value};

/// Default limit on evaluation nesting
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Env,
}

/// A lexical scope
#[derive(Debug, Clone, Default)]
pub struct Env(Option<Arc<Frame>>);

impl Env {
    /// The empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// New scope binding a single variable on top of this one
    pub fn with(&self, name: impl Into<String>, value: Value) -> Env {
        let mut vars = HashMap::with_capacity(1);
        vars.insert(name.into(), value);
        self.extend(vars)
    }

    /// New scope binding all of `vars` on top of this one
    pub fn extend(&self, vars: HashMap<String, Value>) -> Env {
        Env(Some(Arc::new(Frame {
            vars,
            parent: self.clone(),
        })))
    }

    /// Innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut env = self;
        while let Some(frame) = &env.0 {
            if let Some(value) = frame.vars.get(name) {
                return Some(value);
            }
            env = &frame.parent;
        }
        None
    }
}

/// Evaluates expressions against the built-in table
#[derive(Debug, Clone)]
pub struct Interpreter {
    max_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the nesting limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Reject programs calling functions outside the built-in table
    pub fn check(&self, expr: &Expr) -> Result<(), EvalError> {
        let mut unknown = None;
        expr.for_each_call(&mut |name| {
            if unknown.is_none() && !builtins::is_known(name) {
                unknown = Some(name.to_string());
            }
        });
        match unknown {
            Some(name) => Err(EvalError::UnknownFunction(name)),
            None => Ok(()),
        }
    }

    /// Evaluate `expr` in `env`
    pub fn eval(&self, expr: &Expr, env: &Env) -> Result<Value, EvalError> {
        self.eval_at(expr, env, 0)
    }

    /// Call a closure value with positional arguments
    pub fn apply(&self, func: &Value, args: Vec<Value>) -> Result<Value, EvalError> {
        self.apply_at("apply", func, args, 0)
    }

    fn eval_at(&self, expr: &Expr, env: &Env, depth: usize) -> Result<Value, EvalError> {
        if depth > self.max_depth {
            return Err(EvalError::DepthExceeded(self.max_depth));
        }
        let next = depth + 1;

        match expr {
            Expr::Literal(json) => Ok(Value::from(json)),
            Expr::Var(name) => env
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
            Expr::Attr { object, key } => {
                let object = self.eval_at(object, env, next)?;
                let key = self.eval_at(key, env, next)?;
                attribute(object, key)
            }
            Expr::Call { func, args } => self.call(func, args, env, next),
            Expr::Let { bindings, body } => {
                let mut scope = env.clone();
                for (name, value) in bindings {
                    let value = self.eval_at(value, &scope, next)?;
                    scope = scope.with(name.clone(), value);
                }
                self.eval_at(body, &scope, next)
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_at(cond, env, next)?.is_truthy() {
                    self.eval_at(then, env, next)
                } else {
                    self.eval_at(otherwise, env, next)
                }
            }
            Expr::Lambda { params, body } => Ok(Value::Lambda(Arc::new(Closure {
                params: params.clone(),
                body: Arc::clone(body),
                env: env.clone(),
            }))),
            Expr::Seq(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.eval_at(item, env, next)?;
                }
                Ok(last)
            }
        }
    }

    fn call(&self, func: &str, args: &[Expr], env: &Env, depth: usize) -> Result<Value, EvalError> {
        match func {
            "and" => {
                for arg in args {
                    if !self.eval_at(arg, env, depth)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "or" => {
                for arg in args {
                    if self.eval_at(arg, env, depth)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.eval_at(arg, env, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                match func {
                    "map" => self.map(values, depth),
                    "filter" => self.filter(values, depth),
                    "reduce" => self.reduce(values, depth),
                    _ => builtins::call(func, values),
                }
            }
        }
    }

    fn apply_at(&self, caller: &str, func: &Value, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
        let closure = match func {
            Value::Lambda(closure) => closure,
            other => return Err(EvalError::type_mismatch(caller, "lambda", other.type_name())),
        };
        if closure.params.len() != args.len() {
            return Err(EvalError::arity(
                caller,
                closure.params.len().to_string(),
                args.len(),
            ));
        }
        let vars = closure.params.iter().cloned().zip(args).collect();
        self.eval_at(&closure.body, &closure.env.extend(vars), depth + 1)
    }

    /// `["map", f, list]` applies `f(item)`; over a dict it applies `f(key, value)`.
    /// Both yield a list.
    fn map(&self, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
        let [func, collection] = builtins::exact::<2>("map", args)?;
        let mapped = match collection {
            Value::List(items) => items
                .into_iter()
                .map(|item| self.apply_at("map", &func, vec![item], depth))
                .collect::<Result<Vec<_>, _>>()?,
            Value::Dict(entries) => entries
                .into_iter()
                .map(|(key, value)| self.apply_at("map", &func, vec![Value::String(key), value], depth))
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(EvalError::type_mismatch("map", "list or dict", other.type_name())),
        };
        Ok(Value::List(mapped))
    }

    fn filter(&self, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
        let [func, collection] = builtins::exact::<2>("filter", args)?;
        match collection {
            Value::List(items) => {
                let mut kept = Vec::new();
                for item in items {
                    if self.apply_at("filter", &func, vec![item.clone()], depth)?.is_truthy() {
                        kept.push(item);
                    }
                }
                Ok(Value::List(kept))
            }
            Value::Dict(entries) => {
                let mut kept = std::collections::BTreeMap::new();
                for (key, value) in entries {
                    let args = vec![Value::String(key.clone()), value.clone()];
                    if self.apply_at("filter", &func, args, depth)?.is_truthy() {
                        kept.insert(key, value);
                    }
                }
                Ok(Value::Dict(kept))
            }
            other => Err(EvalError::type_mismatch("filter", "list or dict", other.type_name())),
        }
    }

    fn reduce(&self, args: Vec<Value>, depth: usize) -> Result<Value, EvalError> {
        let [func, init, items] = builtins::exact::<3>("reduce", args)?;
        builtins::list("reduce", items)?
            .into_iter()
            .try_fold(init, |acc, item| self.apply_at("reduce", &func, vec![acc, item], depth))
    }
}

fn attribute(object: Value, key: Value) -> Result<Value, EvalError> {
    match (object, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Dict(mut entries), Value::String(key)) => Ok(entries.remove(&key).unwrap_or_default()),
        (Value::List(items), Value::Number(index)) => {
            if index < 0.0 || index.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.into_iter().nth(index as usize).unwrap_or_default())
        }
        (Value::Dict(_), key) => Err(EvalError::type_mismatch("attrib-ref", "string key", key.type_name())),
        (Value::List(_), key) => Err(EvalError::type_mismatch("attrib-ref", "numeric index", key.type_name())),
        (other, _) => Err(EvalError::type_mismatch("attrib-ref", "dict or list", other.type_name())),
    }
}
