//! Resolution of `ref` schema nodes.
//!
//! The schema and the configuration tree are walked together. Every `ref`
//! node holding a value hands its raw string to the owning source, and the
//! result replaces the raw string in place. Mergeable results are searched
//! for nested refs (using the ref's target schema) before substitution.

use crate::error::{ResolveError, ResolveResult};
use crate::schema::{RefSchema, Schema, SchemaKind, accepts};
use crate::sources::{LoadContext, Resolved, Source};
use crate::tree::{ConfigPath, ConfigTree, Segment};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolve every ref in `tree`. Returns the number of refs replaced.
///
/// Refs with no value are left alone. Re-entering a `(source, params)` pair
/// that is still being resolved fails with a circular reference error.
pub async fn resolve_refs(
    schema: &Schema,
    tree: &mut ConfigTree,
    sources: &[Arc<dyn Source>],
    ctx: &LoadContext,
) -> ResolveResult<usize> {
    if !schema.contains_refs() {
        return Ok(0);
    }
    let merged = tree.clone();
    let resolver = RefResolver {
        sources,
        ctx,
        merged: &merged,
    };
    let mut stack = Vec::new();
    resolver.resolve_tree(schema, tree, &mut stack).await
}

/// A ref currently being resolved.
struct Frame {
    key: String,
    label: String,
}

struct RefResolver<'a> {
    sources: &'a [Arc<dyn Source>],
    ctx: &'a LoadContext,
    merged: &'a ConfigTree,
}

impl<'a> RefResolver<'a> {
    fn resolve_tree<'b>(
        &'b self,
        schema: &'b Schema,
        tree: &'b mut ConfigTree,
        stack: &'b mut Vec<Frame>,
    ) -> BoxFuture<'b, ResolveResult<usize>> {
        Box::pin(async move {
            let mut sites = Vec::new();
            collect_refs(schema, &tree.value, &ConfigPath::root(), &mut sites);

            let mut resolved = 0;
            for (path, reference) in sites {
                let Some(current) = tree.get(&path) else {
                    continue;
                };
                let location = tree
                    .origin(&path)
                    .map(str::to_string)
                    .unwrap_or_else(|| path.to_string());
                let raw = match current {
                    Value::String(raw) => raw.clone(),
                    _ => return Err(ResolveError::resolution(location, "value is not a string")),
                };

                let source = self
                    .sources
                    .iter()
                    .find(|source| source.name() == reference.source)
                    .ok_or_else(|| {
                        ResolveError::resolution(
                            &location,
                            format!("source '{}' is not registered", reference.source),
                        )
                    })?;
                let value_resolver = source.value_resolver().ok_or_else(|| {
                    ResolveError::resolution(
                        &location,
                        format!(
                            "source '{}' does not support single-value resolution",
                            reference.source
                        ),
                    )
                })?;

                let params = reference.params_for(&raw);
                let frame = Frame {
                    key: format!("{}:{}", reference.source, Value::Object(params.clone())),
                    label: format!("{}({})", reference.source, raw),
                };
                if stack.iter().any(|active| active.key == frame.key) {
                    let mut chain: Vec<String> = stack.iter().map(|f| f.label.clone()).collect();
                    chain.push(frame.label);
                    return Err(ResolveError::CircularReference { chain });
                }

                debug!(field = %path, source = %reference.source, "Resolving ref");
                match value_resolver
                    .resolve_single(&params, &reference.target, self.ctx, self.merged)
                    .await?
                {
                    Resolved::NonMergeable { value, origin } => {
                        let opaque = value.is_object();
                        tree.set(&path, value, Some(&origin));
                        let node = tree.provenance.at_mut(&path);
                        node.children.clear();
                        node.opaque = opaque;
                    }
                    Resolved::Mergeable(mut nested) => {
                        stack.push(frame);
                        let outcome = self
                            .resolve_tree(&reference.target, &mut nested, stack)
                            .await;
                        stack.pop();
                        resolved += outcome?;
                        tree.graft(&path, nested);
                    }
                }
                resolved += 1;
            }
            Ok(resolved)
        })
    }
}

/// Paths of defined ref values, outermost first.
fn collect_refs<'s>(
    schema: &'s Schema,
    value: &Value,
    path: &ConfigPath,
    out: &mut Vec<(ConfigPath, &'s RefSchema)>,
) {
    if value.is_null() || !schema.contains_refs() {
        return;
    }
    match &schema.kind {
        SchemaKind::Ref(reference) => out.push((path.clone(), reference)),
        SchemaKind::Object(object) => {
            if let Value::Object(map) = value {
                for (name, child) in &object.properties {
                    if let Some(child_value) = map.get(name) {
                        collect_refs(
                            child,
                            child_value,
                            &path.child(Segment::Key(name.clone())),
                            out,
                        );
                    }
                }
            }
        }
        SchemaKind::Array(items) => {
            if let Value::Array(elements) = value {
                for (index, element) in elements.iter().enumerate() {
                    collect_refs(items, element, &path.child(Segment::Index(index)), out);
                }
            }
        }
        SchemaKind::Union(alternatives) | SchemaKind::FatUnion(alternatives) => {
            if let Some(alternative) = alternatives.iter().find(|alt| accepts(alt, value)) {
                collect_refs(alternative, value, path, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{FileSource, MemorySource};
    use serde_json::{Map, json};
    use std::fs;
    use tempfile::TempDir;

    fn key_ref(target: Schema) -> Schema {
        Schema::reference("vault", target, |raw| {
            let mut params = Map::new();
            params.insert("key".into(), json!(raw));
            params
        })
    }

    fn vault() -> MemorySource {
        MemorySource::new("vault", json!({}), "vault")
            .with_value(
                "db",
                Resolved::NonMergeable {
                    value: json!("hunter2"),
                    origin: "vault:db".into(),
                },
            )
            .with_value(
                "nested",
                Resolved::Mergeable(ConfigTree::with_origin(
                    json!({"user": "app", "password": "db"}),
                    "vault:nested",
                )),
            )
            .with_value(
                "loop",
                Resolved::Mergeable(ConfigTree::with_origin(
                    json!({"next": "loop"}),
                    "vault:loop",
                )),
            )
    }

    #[tokio::test]
    async fn test_non_mergeable_replaces_value_and_origin() {
        let schema = Schema::object([("password", key_ref(Schema::secret()))]);
        let mut tree = ConfigTree::with_origin(json!({"password": "db"}), "config.yaml");
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(vault())];

        let count = resolve_refs(&schema, &mut tree, &sources, &LoadContext::new())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(tree.value, json!({"password": "hunter2"}));
        assert_eq!(
            tree.origin(&ConfigPath::parse("password")),
            Some("vault:db")
        );
    }

    #[tokio::test]
    async fn test_mergeable_result_is_resolved_recursively() {
        let inner = Schema::object([
            ("user", Schema::string()),
            ("password", key_ref(Schema::secret())),
        ]);
        let schema = Schema::object([("db", key_ref(inner))]);
        let mut tree = ConfigTree::with_origin(json!({"db": "nested"}), "config.yaml");
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(vault())];

        let count = resolve_refs(&schema, &mut tree, &sources, &LoadContext::new())
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(tree.value, json!({"db": {"user": "app", "password": "hunter2"}}));
        assert_eq!(
            tree.origin(&ConfigPath::parse("db.user")),
            Some("vault:nested")
        );
        assert_eq!(
            tree.origin(&ConfigPath::parse("db.password")),
            Some("vault:db")
        );
    }

    #[tokio::test]
    async fn test_cycle_is_detected() {
        fn looping(depth: usize) -> Schema {
            if depth == 0 {
                return Schema::string();
            }
            key_ref(Schema::object([("next", looping(depth - 1))]))
        }
        let schema = Schema::object([("start", looping(4))]);
        let mut tree = ConfigTree::with_origin(json!({"start": "loop"}), "config.yaml");
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(vault())];

        let err = resolve_refs(&schema, &mut tree, &sources, &LoadContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular reference detected: vault(loop) -> vault(loop)"
        );
    }

    #[tokio::test]
    async fn test_undefined_refs_are_untouched() {
        let schema = Schema::object([("password", key_ref(Schema::secret()).optional())]);
        let mut tree = ConfigTree::empty();
        let count = resolve_refs(&schema, &mut tree, &[], &LoadContext::new())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(tree.value, json!({}));
    }

    #[tokio::test]
    async fn test_non_string_value_fails() {
        let schema = Schema::object([("password", key_ref(Schema::secret()))]);
        let mut tree = ConfigTree::with_origin(json!({"password": 5}), "envs:PASSWORD");
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(vault())];
        let err = resolve_refs(&schema, &mut tree, &sources, &LoadContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "envs:PASSWORD: value is not a string");
    }

    #[tokio::test]
    async fn test_source_must_exist_and_support_single_values() {
        let schema = Schema::object([("password", key_ref(Schema::secret()))]);
        let mut tree = ConfigTree::with_origin(json!({"password": "db"}), "config.yaml");

        let err = resolve_refs(&schema, &mut tree, &[], &LoadContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "config.yaml: source 'vault' is not registered"
        );

        let plain: Vec<Arc<dyn Source>> =
            vec![Arc::new(MemorySource::new("vault", json!({}), "vault"))];
        let err = resolve_refs(&schema, &mut tree, &plain, &LoadContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "config.yaml: source 'vault' does not support single-value resolution"
        );
    }

    #[tokio::test]
    async fn test_refs_inside_arrays_and_unions() {
        let schema = Schema::object([
            ("secrets", Schema::array(key_ref(Schema::secret()))),
            (
                "password",
                Schema::union([Schema::integer().no_coerce(), key_ref(Schema::secret())]),
            ),
        ]);
        let mut tree = ConfigTree::with_origin(
            json!({"secrets": ["db", "db"], "password": "db"}),
            "config.yaml",
        );
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(vault())];

        resolve_refs(&schema, &mut tree, &sources, &LoadContext::new())
            .await
            .unwrap();
        assert_eq!(
            tree.value,
            json!({"secrets": ["hunter2", "hunter2"], "password": "hunter2"})
        );
    }

    #[tokio::test]
    async fn test_file_refs_through_nested_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("db.yaml"),
            "host: db.internal\ncert: cert.pem\n",
        )
        .unwrap();
        fs::write(dir.path().join("cert.pem"), "-----BEGIN-----\n").unwrap();

        let schema = Schema::object([(
            "db",
            Schema::file_ref(
                "file",
                Schema::object([
                    ("host", Schema::string()),
                    ("cert", Schema::file_ref("file", Schema::string())),
                ]),
            ),
        )]);
        let mut tree = ConfigTree::with_origin(json!({"db": "db.yaml"}), "args:--db");
        let sources: Vec<Arc<dyn Source>> = vec![Arc::new(FileSource::new("unused.yaml"))];
        let ctx = LoadContext::new().with_cwd(dir.path());

        resolve_refs(&schema, &mut tree, &sources, &ctx).await.unwrap();
        assert_eq!(
            tree.value,
            json!({"db": {"host": "db.internal", "cert": "-----BEGIN-----"}})
        );
        let cert_origin = dir.path().join("cert.pem").display().to_string();
        assert_eq!(
            tree.origin(&ConfigPath::parse("db.cert")),
            Some(cert_origin.as_str())
        );
    }
}
