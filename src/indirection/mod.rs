//! Indirection expressions: `%name('arg', ...)` or `%name(key='arg', ...)`.
//!
//! String values of this shape inside loaded configuration are compiled and
//! replaced by the value a registered function returns. Only flat calls with
//! string-literal arguments exist; there is no nesting or arithmetic.

mod evaluator;
mod parser;
mod scanner;

pub use evaluator::{
    BoundArgs, Evaluator, EvaluatorFunction, FunctionEvaluator, FunctionHandler, OneOfEvaluator,
    ParamSpec, ParamType, SyncHandler,
};
pub use scanner::{Token, scan};

use crate::error::{CompileError, ResolveError, ResolveResult};
use crate::tree::{ConfigPath, ConfigTree, Segment};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Leading character that marks a string as an indirection expression.
pub const SIGIL: char = '%';

/// Arguments of a compiled call: all positional or all named, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arguments {
    Positional(Vec<String>),
    Named(BTreeMap<String, String>),
}

/// A compiled indirection: the function to call and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectionExpression {
    pub source: String,
    pub args: Arguments,
}

impl IndirectionExpression {
    pub fn positional<S: Into<String>>(source: &str, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            source: source.to_string(),
            args: Arguments::Positional(args.into_iter().map(Into::into).collect()),
        }
    }

    pub fn named<K: Into<String>, V: Into<String>>(
        source: &str,
        args: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            source: source.to_string(),
            args: Arguments::Named(
                args.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

/// Whether `value` is written as an indirection expression.
pub fn is_indirection_expression(value: &str) -> bool {
    value.starts_with(SIGIL)
}

/// Compile an indirection expression string.
///
/// # Example
/// ```
/// use stratum_config::indirection::{compile, IndirectionExpression};
///
/// let expr = compile("%vault('secret/db', 'password')").unwrap();
/// assert_eq!(expr, IndirectionExpression::positional("vault", ["secret/db", "password"]));
/// ```
pub fn compile(value: &str) -> Result<IndirectionExpression, CompileError> {
    if !is_indirection_expression(value) {
        return Err(CompileError::MissingSigil);
    }
    parser::parse(scan(value)?)
}

/// Replace every indirection string in `tree` with its evaluated value.
///
/// Functions see the tree as it was before any replacement. Values are
/// replaced depth-first in key order; a replacement is not re-evaluated
/// even if it is itself an expression. Returns the number of replacements.
pub async fn resolve_indirections(
    tree: &mut ConfigTree,
    evaluator: &dyn Evaluator,
) -> ResolveResult<usize> {
    let mut pending = Vec::new();
    collect_expressions(&tree.value, &ConfigPath::root(), &mut pending);
    if pending.is_empty() {
        return Ok(0);
    }

    let loaded = tree.value.clone();
    let mut replaced = 0;
    for (path, raw) in pending {
        let location = tree
            .origin(&path)
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string());
        let expr = compile(&raw).map_err(|source| ResolveError::Compile {
            location: location.clone(),
            source,
        })?;
        debug!(field = %path, function = %expr.source, "Resolving indirection");
        let value = evaluator
            .evaluate(&expr, &loaded)
            .await
            .map_err(|err| err.located(location.as_str()))?;
        if let Some(slot) = tree.get_mut(&path) {
            *slot = value;
            replaced += 1;
        }
    }
    Ok(replaced)
}

fn collect_expressions(value: &Value, path: &ConfigPath, out: &mut Vec<(ConfigPath, String)>) {
    match value {
        Value::String(raw) if is_indirection_expression(raw) => {
            out.push((path.clone(), raw.clone()));
        }
        Value::Object(map) => {
            for (key, child) in map {
                collect_expressions(child, &path.child(Segment::Key(key.clone())), out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_expressions(child, &path.child(Segment::Index(index)), out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_function() -> EvaluatorFunction {
        EvaluatorFunction::from_fn("env", vec![ParamSpec::required("name")], |args, _| {
            match args["name"].as_str() {
                Some("DB_PASSWORD") => Ok(json!("hunter2")),
                Some("PORT") => Ok(json!("5432")),
                other => Err(ResolveError::resolution(
                    "%env",
                    format!("variable {:?} is not set", other),
                )),
            }
        })
        .unwrap()
    }

    #[test]
    fn test_compile_positional() {
        assert_eq!(
            compile("%f('a','b')").unwrap(),
            IndirectionExpression::positional("f", ["a", "b"])
        );
    }

    #[test]
    fn test_compile_named() {
        assert_eq!(
            compile("%f(k='a')").unwrap(),
            IndirectionExpression::named("f", [("k", "a")])
        );
    }

    #[test]
    fn test_compile_rejects_mixed() {
        let err = compile("%f('a', k='b')").unwrap_err();
        assert_eq!(err.to_string(), "Cannot mix positional and named arguments");
    }

    #[test]
    fn test_compile_requires_sigil() {
        assert_eq!(compile("f('a')"), Err(CompileError::MissingSigil));
        assert!(is_indirection_expression("%f()"));
        assert!(!is_indirection_expression("100%"));
    }

    #[tokio::test]
    async fn test_resolve_replaces_nested_values() {
        let mut tree = ConfigTree::with_origin(
            json!({
                "db": {"password": "%env('DB_PASSWORD')", "port": "%env(name=\"PORT\")"},
                "hosts": ["a", "%env('PORT')"],
                "plain": "value"
            }),
            "config.yaml",
        );
        let evaluator = FunctionEvaluator::new().with(env_function());

        let count = resolve_indirections(&mut tree, &evaluator).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            tree.value,
            json!({
                "db": {"password": "hunter2", "port": "5432"},
                "hosts": ["a", "5432"],
                "plain": "value"
            })
        );
        assert_eq!(
            tree.origin(&ConfigPath::parse("db.password")),
            Some("config.yaml")
        );
    }

    #[tokio::test]
    async fn test_compile_errors_are_located_at_origin() {
        let mut tree = ConfigTree::empty();
        tree.set(&ConfigPath::parse("token"), json!("%env('X'"), Some("envs:TOKEN"));
        let evaluator = FunctionEvaluator::new().with(env_function());

        let err = resolve_indirections(&mut tree, &evaluator).await.unwrap_err();
        assert_eq!(err.to_string(), "envs:TOKEN: Expected closing ')'");
    }

    #[tokio::test]
    async fn test_dispatch_errors_are_located_at_origin() {
        let mut tree = ConfigTree::empty();
        tree.set(&ConfigPath::parse("token"), json!("%vault('x')"), None);
        let evaluator = FunctionEvaluator::new();

        let err = resolve_indirections(&mut tree, &evaluator).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "token: Unknown function 'vault', available functions are:"
        );
    }
}
