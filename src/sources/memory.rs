//! In-memory source for embedding and tests.

use super::{FunctionProvider, LoadContext, Resolved, Source, ValueResolver};
use crate::error::{ResolveError, ResolveResult};
use crate::indirection::EvaluatorFunction;
use crate::schema::Schema;
use crate::tree::ConfigTree;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A fixed tree, plus optional single-value lookups and one function.
///
/// Lookups are keyed by the `key` ref parameter and return the result kind
/// they were registered with.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    tree: ConfigTree,
    values: BTreeMap<String, Resolved>,
    function: Option<EvaluatorFunction>,
}

impl MemorySource {
    /// A source contributing `value`, with every node attributed to `origin`.
    pub fn new(name: impl Into<String>, value: Value, origin: &str) -> Self {
        Self::from_tree(name, ConfigTree::with_origin(value, origin))
    }

    pub fn from_tree(name: impl Into<String>, tree: ConfigTree) -> Self {
        Self {
            name: name.into(),
            tree,
            values: BTreeMap::new(),
            function: None,
        }
    }

    /// Register a single-value lookup for refs resolved by this source.
    pub fn with_value(mut self, key: impl Into<String>, resolved: Resolved) -> Self {
        self.values.insert(key.into(), resolved);
        self
    }

    /// Contribute an indirection function.
    pub fn with_function(mut self, function: EvaluatorFunction) -> Self {
        self.function = Some(function);
        self
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        _schema: &Schema,
        _merged: &ConfigTree,
        _ctx: &LoadContext,
    ) -> ResolveResult<ConfigTree> {
        Ok(self.tree.clone())
    }

    fn value_resolver(&self) -> Option<&dyn ValueResolver> {
        if self.values.is_empty() {
            None
        } else {
            Some(self)
        }
    }

    fn function_provider(&self) -> Option<&dyn FunctionProvider> {
        self.function.as_ref().map(|_| self as &dyn FunctionProvider)
    }
}

#[async_trait]
impl ValueResolver for MemorySource {
    async fn resolve_single(
        &self,
        params: &Map<String, Value>,
        _target: &Schema,
        _ctx: &LoadContext,
        _merged: &ConfigTree,
    ) -> ResolveResult<Resolved> {
        let key = params
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolveError::resolution(&self.name, "missing 'key' parameter"))?;
        self.values.get(key).cloned().ok_or_else(|| {
            ResolveError::resolution(&self.name, format!("no value registered for '{}'", key))
        })
    }
}

impl FunctionProvider for MemorySource {
    fn build_function(
        &self,
        _merged: &ConfigTree,
        _ctx: &LoadContext,
    ) -> ResolveResult<EvaluatorFunction> {
        self.function.clone().ok_or_else(|| {
            ResolveError::source_failed(&self.name, "no function registered")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ConfigPath;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_returns_tree() {
        let source = MemorySource::new("defaults", json!({"a": {"b": 1}}), "memory");
        let schema = Schema::object([("a", Schema::object([("b", Schema::integer())]))]);
        let tree = source
            .load(&schema, &ConfigTree::empty(), &LoadContext::new())
            .await
            .unwrap();
        assert_eq!(tree.value, json!({"a": {"b": 1}}));
        assert_eq!(tree.origin(&ConfigPath::parse("a.b")), Some("memory"));
    }

    #[tokio::test]
    async fn test_capabilities_follow_registration() {
        let source = MemorySource::new("m", json!({}), "memory");
        assert!(source.value_resolver().is_none());
        assert!(source.function_provider().is_none());

        let source = source.with_value(
            "k",
            Resolved::NonMergeable {
                value: json!("v"),
                origin: "vault:k".into(),
            },
        );
        let resolver = source.value_resolver().unwrap();
        let mut params = Map::new();
        params.insert("key".into(), json!("k"));
        let resolved = resolver
            .resolve_single(&params, &Schema::string(), &LoadContext::new(), &ConfigTree::empty())
            .await
            .unwrap();
        assert!(matches!(resolved, Resolved::NonMergeable { .. }));

        params.insert("key".into(), json!("missing"));
        let err = resolver
            .resolve_single(&params, &Schema::string(), &LoadContext::new(), &ConfigTree::empty())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "m: no value registered for 'missing'");
    }
}
