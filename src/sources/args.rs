//! Command line flag source.

use super::{LoadContext, Source, split_list};
use crate::error::ResolveResult;
use crate::schema::{Schema, SchemaKind};
use crate::tree::{ConfigPath, ConfigTree};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Reads `--dotted.path=value` and `--dotted.path value` flags.
///
/// Only flags naming a schema leaf are used. A boolean flag with no value
/// means `true`; array flags may repeat and split on commas.
#[derive(Debug, Clone, Default)]
pub struct ArgsSource;

impl ArgsSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Source for ArgsSource {
    fn name(&self) -> &str {
        "args"
    }

    async fn load(
        &self,
        schema: &Schema,
        _merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<ConfigTree> {
        // Keyed by flag name; the schema's own path keeps numeric property names as keys
        let leaves: BTreeMap<String, (ConfigPath, &Schema)> = schema
            .leaves()
            .into_iter()
            .filter(|(path, _)| !path.is_root())
            .map(|(path, leaf)| (path.to_string(), (path, leaf)))
            .collect();

        let mut tree = ConfigTree::empty();
        let mut args = ctx.argv.iter().peekable();
        while let Some(arg) = args.next() {
            let Some(flag) = arg.strip_prefix("--") else {
                continue;
            };
            let (name, inline) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag, None),
            };
            let Some((path, leaf)) = leaves.get(name) else {
                debug!(flag = %arg, "Ignoring flag that names no configuration field");
                continue;
            };

            let is_boolean = matches!(leaf.kind, SchemaKind::Boolean);
            let raw = match inline {
                Some(value) => value,
                None => match args.peek() {
                    Some(next) if !next.starts_with("--") => match args.next() {
                        Some(next) => next.clone(),
                        None => continue,
                    },
                    _ if is_boolean => "true".to_string(),
                    _ => {
                        debug!(flag = %arg, "Ignoring flag without a value");
                        continue;
                    }
                },
            };

            let origin = format!("args:--{}", name);
            match &leaf.kind {
                SchemaKind::Array(_) => {
                    let mut items = match tree.get(path) {
                        Some(Value::Array(existing)) => existing.clone(),
                        _ => Vec::new(),
                    };
                    items.extend(split_list(&raw));
                    tree.set(path, Value::Array(items), Some(&origin));
                }
                _ => {
                    if tree.get(path).is_some() {
                        debug!(flag = %arg, "Flag repeated, keeping the first value");
                        continue;
                    }
                    tree.set(path, Value::String(raw), Some(&origin));
                }
            }
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::object([
            (
                "server",
                Schema::object([("port", Schema::integer()), ("host", Schema::string())]),
            ),
            ("verbose", Schema::boolean().optional()),
            ("tags", Schema::array(Schema::string()).optional()),
        ])
    }

    async fn load(argv: &[&str]) -> ConfigTree {
        let ctx = LoadContext::new().with_args(argv.iter().copied());
        ArgsSource::new()
            .load(&schema(), &ConfigTree::empty(), &ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_inline_and_separate_values() {
        let tree = load(&["--server.port=8080", "--server.host", "example.com"]).await;
        assert_eq!(
            tree.value,
            json!({"server": {"port": "8080", "host": "example.com"}})
        );
        assert_eq!(
            tree.origin(&ConfigPath::parse("server.port")),
            Some("args:--server.port")
        );
    }

    #[tokio::test]
    async fn test_boolean_flag_without_value() {
        let tree = load(&["--verbose", "--server.port=1"]).await;
        assert_eq!(tree.value["verbose"], json!("true"));
    }

    #[tokio::test]
    async fn test_unknown_and_positional_ignored() {
        let tree = load(&["serve", "--unknown=1", "--server", "x"]).await;
        assert_eq!(tree.value, json!({}));
    }

    #[tokio::test]
    async fn test_array_flags_accumulate() {
        let tree = load(&["--tags=a,b", "--tags", "c"]).await;
        assert_eq!(tree.value["tags"], json!(["a", "b", "c"]));
    }

    #[tokio::test]
    async fn test_first_scalar_flag_wins() {
        let tree = load(&["--server.port=1", "--server.port=2"]).await;
        assert_eq!(tree.value["server"]["port"], json!("1"));
    }

    #[tokio::test]
    async fn test_numeric_property_names_stay_keys() {
        let schema = Schema::object([("pages", Schema::object([("404", Schema::string())]))]);
        let ctx = LoadContext::new().with_args(["--pages.404=x.html"]);
        let tree = ArgsSource::new()
            .load(&schema, &ConfigTree::empty(), &ctx)
            .await
            .unwrap();

        assert_eq!(tree.value, json!({"pages": {"404": "x.html"}}));
        assert_eq!(
            tree.origin(&ConfigPath::parse("pages.404")),
            Some("args:--pages.404")
        );
    }

    #[tokio::test]
    async fn test_empty_array_flag_items_are_dropped() {
        let tree = load(&["--tags=", "--tags", "a,,b"]).await;
        assert_eq!(tree.value["tags"], json!(["a", "b"]));
    }
}
