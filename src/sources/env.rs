//! Environment variable source.

use super::{FunctionProvider, LoadContext, Source, split_list};
use crate::error::{ResolveError, ResolveResult};
use crate::indirection::{EvaluatorFunction, ParamSpec};
use crate::schema::{Schema, SchemaKind};
use crate::tree::{ConfigPath, ConfigTree};
use async_trait::async_trait;
use heck::ToShoutySnakeCase;
use serde_json::Value;
use tracing::debug;

/// Reads schema leaves from environment variables.
///
/// A leaf's declared `env` aliases are tried in order. Leaves without
/// aliases use the prefix followed by the shouty snake case of their path,
/// so `server.port` becomes `APP_SERVER_PORT` with prefix `APP_`.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Variable names consulted for the leaf at `path`, in priority order.
    pub fn variable_names(&self, path: &ConfigPath, schema: &Schema) -> Vec<String> {
        if !schema.meta.env.is_empty() {
            return schema.meta.env.clone();
        }
        let joined = path.keys().collect::<Vec<_>>().join("_");
        vec![format!("{}{}", self.prefix, joined.to_shouty_snake_case())]
    }
}

#[async_trait]
impl Source for EnvSource {
    fn name(&self) -> &str {
        "env"
    }

    async fn load(
        &self,
        schema: &Schema,
        _merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<ConfigTree> {
        let mut tree = ConfigTree::empty();
        for (path, leaf) in schema.leaves() {
            if path.is_root() {
                continue;
            }
            let found = self
                .variable_names(&path, leaf)
                .into_iter()
                .find_map(|name| ctx.env.get(&name).map(|raw| (name, raw)));
            let Some((name, raw)) = found else {
                continue;
            };
            let value = match &leaf.kind {
                SchemaKind::Array(_) => Value::Array(split_list(raw).collect()),
                _ => Value::String(raw.clone()),
            };
            debug!(variable = %name, field = %path, "Loaded value from environment");
            tree.set(&path, value, Some(&format!("envs:{}", name)));
        }
        Ok(tree)
    }

    fn function_provider(&self) -> Option<&dyn FunctionProvider> {
        Some(self)
    }
}

impl FunctionProvider for EnvSource {
    /// `%env('NAME')` reads a variable from the load context.
    fn build_function(
        &self,
        _merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<EvaluatorFunction> {
        let env = ctx.env.clone();
        EvaluatorFunction::from_fn("env", vec![ParamSpec::required("name")], move |args, _| {
            let name = args.get("name").and_then(Value::as_str).unwrap_or_default();
            env.get(name)
                .map(|value| Value::String(value.clone()))
                .ok_or_else(|| {
                    ResolveError::resolution(
                        "%env",
                        format!("environment variable '{}' is not set", name),
                    )
                })
        })
        .map_err(|err| ResolveError::dispatch("env", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indirection::{Evaluator, FunctionEvaluator, compile};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::object([
            ("host", Schema::string()),
            (
                "server",
                Schema::object([
                    ("port", Schema::integer()),
                    ("maxConnections", Schema::integer().optional()),
                ]),
            ),
            ("tags", Schema::array(Schema::string()).optional()),
            ("token", Schema::secret().env("API_TOKEN").env("LEGACY_TOKEN")),
        ])
    }

    #[test]
    fn test_variable_names() {
        let source = EnvSource::with_prefix("APP_");
        let schema = schema();
        let port = ConfigPath::parse("server.maxConnections");
        assert_eq!(
            source.variable_names(&port, schema.at(&port).unwrap()),
            vec!["APP_SERVER_MAX_CONNECTIONS"]
        );
        let token = ConfigPath::parse("token");
        assert_eq!(
            source.variable_names(&token, schema.at(&token).unwrap()),
            vec!["API_TOKEN", "LEGACY_TOKEN"]
        );
    }

    #[tokio::test]
    async fn test_loads_leaves_with_origins() {
        let ctx = LoadContext::new()
            .with_env("HOST", "localhost")
            .with_env("SERVER_PORT", "8080")
            .with_env("LEGACY_TOKEN", "abc")
            .with_env("UNRELATED", "x");
        let tree = EnvSource::new()
            .load(&schema(), &ConfigTree::empty(), &ctx)
            .await
            .unwrap();

        assert_eq!(
            tree.value,
            json!({"host": "localhost", "server": {"port": "8080"}, "token": "abc"})
        );
        assert_eq!(tree.origin(&ConfigPath::parse("host")), Some("envs:HOST"));
        assert_eq!(
            tree.origin(&ConfigPath::parse("token")),
            Some("envs:LEGACY_TOKEN")
        );
    }

    #[tokio::test]
    async fn test_first_alias_wins() {
        let ctx = LoadContext::new()
            .with_env("API_TOKEN", "new")
            .with_env("LEGACY_TOKEN", "old");
        let tree = EnvSource::new()
            .load(&schema(), &ConfigTree::empty(), &ctx)
            .await
            .unwrap();
        assert_eq!(tree.value["token"], json!("new"));
    }

    #[tokio::test]
    async fn test_arrays_split_on_commas() {
        let ctx = LoadContext::new().with_env("TAGS", "a, b,c");
        let tree = EnvSource::new()
            .load(&schema(), &ConfigTree::empty(), &ctx)
            .await
            .unwrap();
        assert_eq!(tree.value["tags"], json!(["a", "b", "c"]));
    }

    #[tokio::test]
    async fn test_empty_array_variable_is_empty_list() {
        let ctx = LoadContext::new().with_env("TAGS", "");
        let tree = EnvSource::new()
            .load(&schema(), &ConfigTree::empty(), &ctx)
            .await
            .unwrap();
        assert_eq!(tree.value["tags"], json!([]));
        assert_eq!(tree.origin(&ConfigPath::parse("tags")), Some("envs:TAGS"));
    }

    #[tokio::test]
    async fn test_env_function() {
        let ctx = LoadContext::new().with_env("DB_PASSWORD", "hunter2");
        let function = EnvSource::new()
            .build_function(&ConfigTree::empty(), &ctx)
            .unwrap();
        let evaluator = FunctionEvaluator::new().with(function);

        let value = evaluator
            .evaluate(&compile("%env('DB_PASSWORD')").unwrap(), &json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!("hunter2"));

        let err = evaluator
            .evaluate(&compile("%env('MISSING')").unwrap(), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "%env: environment variable 'MISSING' is not set"
        );
    }
}
