//! JSON and YAML file source.

use super::{FunctionProvider, LoadContext, Resolved, Source, ValueResolver, parse_structured};
use crate::error::{ResolveError, ResolveResult};
use crate::indirection::{BoundArgs, EvaluatorFunction, FunctionHandler, ParamSpec};
use crate::schema::Schema;
use crate::tree::{ConfigPath, ConfigTree};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Loads a whole configuration file and resolves file refs.
///
/// Every value loaded from a file carries the file path as its origin.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    path: String,
    optional: bool,
}

impl FileSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            name: "file".to_string(),
            path: path.into(),
            optional: false,
        }
    }

    /// A missing file contributes nothing instead of failing.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Register under a different source name (for several file sources).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

async fn read_text(path: &Path) -> ResolveResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        ResolveError::resolution(path.display().to_string(), format!("cannot read file: {}", e))
    })
}

/// Strip a single trailing line break.
fn trim_newline(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

fn string_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[async_trait]
impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(
        &self,
        _schema: &Schema,
        _merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<ConfigTree> {
        let path = ctx.resolve_path(&self.path);
        if self.optional && !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Optional configuration file not found");
            return Ok(ConfigTree::empty());
        }

        let content = read_text(&path).await?;
        let origin = path.display().to_string();
        let value = match parse_structured(&path, &content) {
            Some(parsed) => parsed?,
            None => {
                return Err(ResolveError::parse(
                    origin,
                    "unsupported file type (expected .json, .yaml or .yml)",
                ));
            }
        };
        if !value.is_object() {
            return Err(ResolveError::parse(origin, "top level must be a mapping"));
        }
        debug!(path = %origin, "Loaded configuration file");
        Ok(ConfigTree::with_origin(value, &origin))
    }

    fn value_resolver(&self) -> Option<&dyn ValueResolver> {
        Some(self)
    }

    fn function_provider(&self) -> Option<&dyn FunctionProvider> {
        Some(self)
    }
}

#[async_trait]
impl ValueResolver for FileSource {
    /// Params: `file` (required) and `encoding` (`utf8` only).
    async fn resolve_single(
        &self,
        params: &Map<String, Value>,
        _target: &Schema,
        ctx: &LoadContext,
        _merged: &ConfigTree,
    ) -> ResolveResult<Resolved> {
        let raw = string_param(params, "file")
            .ok_or_else(|| ResolveError::resolution(&self.name, "missing 'file' parameter"))?;
        if let Some(encoding) = string_param(params, "encoding")
            && !matches!(encoding.to_ascii_lowercase().as_str(), "utf8" | "utf-8")
        {
            return Err(ResolveError::resolution(
                raw,
                format!("unsupported encoding '{}'", encoding),
            ));
        }

        let path = ctx.resolve_path(raw);
        let content = read_text(&path).await?;
        let origin = path.display().to_string();
        match parse_structured(&path, &content) {
            Some(parsed) => Ok(Resolved::Mergeable(ConfigTree::with_origin(parsed?, &origin))),
            None => Ok(Resolved::NonMergeable {
                value: Value::String(trim_newline(content)),
                origin,
            }),
        }
    }
}

impl FunctionProvider for FileSource {
    /// `file(path, key?)`. Positional calls must pass both arguments, since
    /// positional arity counts the optional `key`; read a whole file with the
    /// named form `%file(path='notes.txt')`.
    fn build_function(
        &self,
        _merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<EvaluatorFunction> {
        EvaluatorFunction::new(
            "file",
            vec![ParamSpec::required("path"), ParamSpec::optional("key")],
            FileFunction {
                context: ctx.clone(),
            },
        )
        .map_err(|err| ResolveError::dispatch(&self.name, err))
    }
}

/// `%file('path', 'dotted.key')`: a value from a structured file, or the
/// whole file.
struct FileFunction {
    context: LoadContext,
}

#[async_trait]
impl FunctionHandler for FileFunction {
    async fn invoke(&self, args: BoundArgs, _loaded: &Value) -> ResolveResult<Value> {
        let raw = args.get("path").and_then(Value::as_str).unwrap_or_default();
        let path = self.context.resolve_path(raw);
        debug!(path = %path.display(), "Reading file for indirection");
        let content = read_text(&path).await?;
        let key = args.get("key").and_then(Value::as_str);

        let value = match parse_structured(&path, &content) {
            Some(parsed) => parsed?,
            None if key.is_none() => return Ok(Value::String(trim_newline(content))),
            None => {
                return Err(ResolveError::resolution(
                    "%file",
                    format!("cannot select a key from unstructured file {}", path.display()),
                ));
            }
        };
        match key {
            None => Ok(value),
            Some(key) => ConfigTree::new(value, Default::default())
                .get(&ConfigPath::parse(key))
                .cloned()
                .ok_or_else(|| {
                    ResolveError::resolution(
                        "%file",
                        format!("key '{}' not found in {}", key, path.display()),
                    )
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indirection::{Evaluator, FunctionEvaluator, compile};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn empty_schema() -> Schema {
        Schema::object(Vec::<(String, Schema)>::new())
    }

    fn ctx(dir: &TempDir) -> LoadContext {
        LoadContext::new().with_cwd(dir.path())
    }

    #[tokio::test]
    async fn test_loads_yaml_with_path_origin() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.yaml"), "server:\n  port: 8080\n").unwrap();

        let tree = FileSource::new("app.yaml")
            .load(&empty_schema(), &ConfigTree::empty(), &ctx(&dir))
            .await
            .unwrap();

        assert_eq!(tree.value, json!({"server": {"port": 8080}}));
        let expected = dir.path().join("app.yaml").display().to_string();
        assert_eq!(
            tree.origin(&ConfigPath::parse("server.port")),
            Some(expected.as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let schema = empty_schema();

        let tree = FileSource::new("absent.json")
            .optional()
            .load(&schema, &ConfigTree::empty(), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(tree, ConfigTree::empty());

        let err = FileSource::new("absent.json")
            .load(&schema, &ConfigTree::empty(), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read file"));
    }

    #[tokio::test]
    async fn test_rejects_non_mapping() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("list.json"), "[1, 2]").unwrap();
        let err = FileSource::new("list.json")
            .load(&empty_schema(), &ConfigTree::empty(), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("top level must be a mapping"));
    }

    #[tokio::test]
    async fn test_resolve_single_structured_is_mergeable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("db.json"), r#"{"user": "app"}"#).unwrap();
        let mut params = Map::new();
        params.insert("file".into(), json!("db.json"));
        params.insert("encoding".into(), json!("utf8"));

        let resolved = FileSource::new("unused.json")
            .resolve_single(&params, &Schema::string(), &ctx(&dir), &ConfigTree::empty())
            .await
            .unwrap();
        match resolved {
            Resolved::Mergeable(tree) => assert_eq!(tree.value, json!({"user": "app"})),
            other => panic!("expected mergeable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_single_text_is_terminal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("token.txt"), "s3cret\n").unwrap();
        let mut params = Map::new();
        params.insert("file".into(), json!("token.txt"));

        let resolved = FileSource::new("unused.json")
            .resolve_single(&params, &Schema::secret(), &ctx(&dir), &ConfigTree::empty())
            .await
            .unwrap();
        assert_eq!(
            resolved,
            Resolved::NonMergeable {
                value: json!("s3cret"),
                origin: dir.path().join("token.txt").display().to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_single_rejects_encoding() {
        let mut params = Map::new();
        params.insert("file".into(), json!("a.txt"));
        params.insert("encoding".into(), json!("latin1"));
        let err = FileSource::new("unused.json")
            .resolve_single(&params, &Schema::string(), &LoadContext::new(), &ConfigTree::empty())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "a.txt: unsupported encoding 'latin1'");
    }

    #[tokio::test]
    async fn test_file_function() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("creds.yaml"), "db:\n  password: hunter2\n").unwrap();
        fs::write(dir.path().join("note.txt"), "hello\n").unwrap();
        let function = FileSource::new("unused.json")
            .build_function(&ConfigTree::empty(), &ctx(&dir))
            .unwrap();
        let evaluator = FunctionEvaluator::new().with(function);

        let value = evaluator
            .evaluate(&compile("%file('creds.yaml', 'db.password')").unwrap(), &json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!("hunter2"));

        let value = evaluator
            .evaluate(&compile("%file(path='note.txt')").unwrap(), &json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));

        let err = evaluator
            .evaluate(&compile("%file('creds.yaml', 'db.user')").unwrap(), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("key 'db.user' not found"));
    }

    #[tokio::test]
    async fn test_file_function_whole_file_needs_named_form() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("note.txt"), "hello\n").unwrap();
        let function = FileSource::new("unused.json")
            .build_function(&ConfigTree::empty(), &ctx(&dir))
            .unwrap();
        let evaluator = FunctionEvaluator::new().with(function);

        let err = evaluator
            .evaluate(&compile("%file('note.txt')").unwrap(), &json!({}))
            .await
            .unwrap_err();
        assert!(
            err.to_string()
                .ends_with("Function 'file' expects 2 parameter(s), got 1.")
        );

        let value = evaluator
            .evaluate(&compile("%file(path='note.txt')").unwrap(), &json!({}))
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));
    }

    #[test]
    fn test_trim_newline() {
        assert_eq!(trim_newline("a\n".into()), "a");
        assert_eq!(trim_newline("a\r\n".into()), "a");
        assert_eq!(trim_newline("a\n\n".into()), "a\n");
        assert_eq!(trim_newline("a".into()), "a");
    }
}
