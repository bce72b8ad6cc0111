//! Evaluation of compiled indirection expressions.
//!
//! A [`FunctionEvaluator`] maps function names to [`EvaluatorFunction`]s,
//! binds the expression's arguments to the declared parameters and invokes
//! the handler. Several evaluators can be combined with [`OneOfEvaluator`].

use super::{Arguments, IndirectionExpression};
use crate::error::{DispatchError, ResolveError, ResolveResult};
use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Arguments bound to parameter names, converted to their declared types.
pub type BoundArgs = BTreeMap<String, Value>;

/// Declared type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

impl ParamType {
    fn convert(self, raw: &str) -> Option<Value> {
        match self {
            ParamType::String => Some(Value::String(raw.to_string())),
            ParamType::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            ParamType::Boolean => match raw.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Integer => "an integer",
            ParamType::Boolean => "a boolean",
        }
    }
}

/// A declared function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
}

impl ParamSpec {
    /// A required string parameter.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamType::String,
            required: true,
        }
    }

    /// An optional string parameter.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }

    pub fn of_type(mut self, kind: ParamType) -> Self {
        self.kind = kind;
        self
    }
}

/// The implementation behind a registered function.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    /// Run the function. `loaded` is the configuration merged so far.
    async fn invoke(&self, args: BoundArgs, loaded: &Value) -> ResolveResult<Value>;
}

/// Adapter turning a synchronous closure into a [`FunctionHandler`].
pub struct SyncHandler<F>(pub F);

#[async_trait]
impl<F> FunctionHandler for SyncHandler<F>
where
    F: Fn(&BoundArgs, &Value) -> ResolveResult<Value> + Send + Sync,
{
    async fn invoke(&self, args: BoundArgs, loaded: &Value) -> ResolveResult<Value> {
        (self.0)(&args, loaded)
    }
}

/// A named function that indirection expressions can call.
#[derive(Clone)]
pub struct EvaluatorFunction {
    name: String,
    params: Vec<ParamSpec>,
    handler: Arc<dyn FunctionHandler>,
}

impl fmt::Debug for EvaluatorFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new("^[a-zA-Z]+$").ok());

fn is_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

impl EvaluatorFunction {
    /// Define a function, checking that its names can appear in expressions.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        handler: impl FunctionHandler + 'static,
    ) -> Result<Self, DispatchError> {
        let name = name.into();
        let invalid = |reason: String| DispatchError::InvalidDefinition {
            name: name.clone(),
            reason,
        };

        if !is_identifier(&name) {
            return Err(invalid("function names must be ASCII letters only".into()));
        }
        for (index, param) in params.iter().enumerate() {
            if !is_identifier(&param.name) {
                return Err(invalid(format!(
                    "parameter '{}' must be ASCII letters only",
                    param.name
                )));
            }
            if params[..index].iter().any(|p| p.name == param.name) {
                return Err(invalid(format!("duplicate parameter '{}'", param.name)));
            }
        }

        Ok(Self {
            name,
            params,
            handler: Arc::new(handler),
        })
    }

    /// Define a function backed by a synchronous closure.
    pub fn from_fn<F>(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        f: F,
    ) -> Result<Self, DispatchError>
    where
        F: Fn(&BoundArgs, &Value) -> ResolveResult<Value> + Send + Sync + 'static,
    {
        Self::new(name, params, SyncHandler(f))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Bind expression arguments to this function's parameters.
    pub fn bind(&self, args: &Arguments) -> Result<BoundArgs, DispatchError> {
        let mut bound = BoundArgs::new();
        match args {
            Arguments::Positional(values) => {
                if values.len() != self.params.len() {
                    return Err(DispatchError::Arity {
                        name: self.name.clone(),
                        expected: self.params.len(),
                        got: values.len(),
                    });
                }
                for (param, raw) in self.params.iter().zip(values) {
                    bound.insert(param.name.clone(), self.convert(param, raw)?);
                }
            }
            Arguments::Named(values) => {
                let required = self.params.iter().filter(|p| p.required).count();
                if values.len() < required {
                    return Err(DispatchError::RequiredArity {
                        name: self.name.clone(),
                        expected: required,
                        got: values.len(),
                    });
                }
                if let Some(unknown) = values
                    .keys()
                    .find(|key| !self.params.iter().any(|p| &p.name == *key))
                {
                    return Err(DispatchError::UnknownNamed {
                        param: unknown.clone(),
                        function: self.name.clone(),
                    });
                }
                for param in &self.params {
                    match values.get(&param.name) {
                        Some(raw) => {
                            bound.insert(param.name.clone(), self.convert(param, raw)?);
                        }
                        None if param.required => {
                            return Err(DispatchError::MissingNamed {
                                param: param.name.clone(),
                                function: self.name.clone(),
                            });
                        }
                        None => {}
                    }
                }
            }
        }
        Ok(bound)
    }

    fn convert(&self, param: &ParamSpec, raw: &str) -> Result<Value, DispatchError> {
        param
            .kind
            .convert(raw)
            .ok_or_else(|| DispatchError::InvalidArgument {
                param: param.name.clone(),
                function: self.name.clone(),
                expected: param.kind.describe(),
                got: raw.to_string(),
            })
    }

    /// Bind `args` and run the handler.
    pub async fn call(&self, args: &Arguments, loaded: &Value) -> ResolveResult<Value> {
        let bound = self
            .bind(args)
            .map_err(|err| ResolveError::dispatch(format!("%{}", self.name), err))?;
        self.handler.invoke(bound, loaded).await
    }
}

/// Something that can turn a compiled expression into a value.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Whether this evaluator handles `expr`.
    fn supports(&self, expr: &IndirectionExpression) -> bool;

    async fn evaluate(&self, expr: &IndirectionExpression, loaded: &Value) -> ResolveResult<Value>;
}

/// Registry of named functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionEvaluator {
    functions: BTreeMap<String, EvaluatorFunction>,
}

impl FunctionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any previous one with the same name.
    pub fn register(&mut self, function: EvaluatorFunction) -> Option<EvaluatorFunction> {
        self.functions.insert(function.name.clone(), function)
    }

    pub fn with(mut self, function: EvaluatorFunction) -> Self {
        self.register(function);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&EvaluatorFunction> {
        self.functions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[async_trait]
impl Evaluator for FunctionEvaluator {
    fn supports(&self, expr: &IndirectionExpression) -> bool {
        self.functions.contains_key(&expr.source)
    }

    async fn evaluate(&self, expr: &IndirectionExpression, loaded: &Value) -> ResolveResult<Value> {
        let function = self.functions.get(&expr.source).ok_or_else(|| {
            ResolveError::dispatch(
                format!("%{}", expr.source),
                DispatchError::UnknownFunction {
                    name: expr.source.clone(),
                    available: self.names(),
                },
            )
        })?;
        function.call(&expr.args, loaded).await
    }
}

/// Tries each evaluator in order, using the first that supports the expression.
#[derive(Clone, Default)]
pub struct OneOfEvaluator {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl OneOfEvaluator {
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        Self { evaluators }
    }

    pub fn push(&mut self, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.push(evaluator);
    }
}

#[async_trait]
impl Evaluator for OneOfEvaluator {
    fn supports(&self, expr: &IndirectionExpression) -> bool {
        self.evaluators.iter().any(|e| e.supports(expr))
    }

    async fn evaluate(&self, expr: &IndirectionExpression, loaded: &Value) -> ResolveResult<Value> {
        match self.evaluators.iter().find(|e| e.supports(expr)) {
            Some(evaluator) => evaluator.evaluate(expr, loaded).await,
            None => Err(ResolveError::dispatch(
                format!("%{}", expr.source),
                DispatchError::NoEvaluator,
            )),
        }
    }
}
