//! The resolution pipeline.
//!
//! [`ConfigManager::load`] runs one linear pass:
//! load and merge every source in precedence order, apply schema defaults,
//! validate, resolve indirections, resolve refs, then validate the result.
//! Any failure stops the pass.

use crate::error::{ResolveError, ResolveResult};
use crate::indirection::{
    Evaluator, EvaluatorFunction, FunctionEvaluator, OneOfEvaluator, resolve_indirections,
};
use crate::reference::resolve_refs;
use crate::schema::{Deprecation, Schema, SchemaKind, ValidationOptions, accepts, validate};
use crate::sources::{LoadContext, Source};
use crate::tree::{ConfigPath, ConfigTree, DEFAULT_ORIGIN, Segment, merge};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Placeholder written over secret values by [`LoadedConfig::redacted`].
pub const REDACTED: &str = "******";

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    SourcesLoaded,
    Merged,
    DefaultsApplied,
    Validated,
    IndirectionsResolved,
    RefsResolved,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::SourcesLoaded => "sources_loaded",
            Stage::Merged => "merged",
            Stage::DefaultsApplied => "defaults_applied",
            Stage::Validated => "validated",
            Stage::IndirectionsResolved => "indirections_resolved",
            Stage::RefsResolved => "refs_resolved",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Resolves a configuration from ranked sources against a schema.
///
/// # Example
/// ```no_run
/// use stratum_config::manager::ConfigManager;
/// use stratum_config::schema::Schema;
/// use stratum_config::sources::{EnvSource, FileSource, LoadContext};
///
/// # async fn run() -> Result<(), stratum_config::error::ResolveError> {
/// let schema = Schema::object([("port", Schema::integer().default_value(8080))]);
/// let config = ConfigManager::new(schema)
///     .source(EnvSource::with_prefix("APP_"))
///     .source(FileSource::new("config.yaml").optional())
///     .load(&LoadContext::from_process())
///     .await?;
/// println!("port = {}", config.value()["port"]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConfigManager {
    schema: Arc<Schema>,
    sources: Vec<Arc<dyn Source>>,
    functions: Vec<EvaluatorFunction>,
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl ConfigManager {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            sources: Vec::new(),
            functions: Vec::new(),
            evaluators: Vec::new(),
        }
    }

    /// Append a source. Earlier sources take precedence.
    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn Source>) {
        self.sources.push(source);
    }

    /// Register an indirection function available to every load.
    ///
    /// Functions registered here shadow same-named functions from sources.
    pub fn function(mut self, function: EvaluatorFunction) -> Self {
        self.functions.push(function);
        self
    }

    /// Add an evaluator consulted for expressions no function handles.
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run the full pipeline once.
    pub async fn load(&self, ctx: &LoadContext) -> ResolveResult<LoadedConfig> {
        let mut stage = Stage::Pending;
        match self.run(ctx, &mut stage).await {
            Ok((tree, deprecations)) => Ok(LoadedConfig {
                schema: Arc::clone(&self.schema),
                tree,
                deprecations,
            }),
            Err(err) => {
                warn!(stage = %stage, code = ?err.code(), "Configuration resolution failed");
                advance(&mut stage, Stage::Failed);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        ctx: &LoadContext,
        stage: &mut Stage,
    ) -> ResolveResult<(ConfigTree, Vec<Deprecation>)> {
        let mut merged = ConfigTree::empty();
        let mut loaded = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let partial = source.load(&self.schema, &merged, ctx).await?;
            debug!(source = %source.name(), "Loaded source");
            merge(&mut merged, &partial);
            loaded.push(source.name().to_string());
        }
        advance(stage, Stage::SourcesLoaded);
        advance(stage, Stage::Merged);

        let applied = apply_defaults(&self.schema, &mut merged);
        debug!(count = applied, "Applied schema defaults");
        advance(stage, Stage::DefaultsApplied);

        let mut deprecations =
            validate(&self.schema, &mut merged, ValidationOptions::before_resolution())?;
        // A schema default is not the caller using the field
        deprecations
            .retain(|deprecation| deprecation.origin.as_deref() != Some(DEFAULT_ORIGIN));
        for deprecation in &deprecations {
            warn!(
                field = %deprecation.path,
                origin = deprecation.origin.as_deref().unwrap_or("unknown"),
                "Deprecated configuration field in use: {}",
                deprecation.notice
            );
        }
        advance(stage, Stage::Validated);

        let evaluator = self.build_evaluator(&merged, ctx)?;
        let replaced = resolve_indirections(&mut merged, evaluator.as_ref()).await?;
        debug!(count = replaced, "Resolved indirections");
        advance(stage, Stage::IndirectionsResolved);

        let resolved = resolve_refs(&self.schema, &mut merged, &self.sources, ctx).await?;
        debug!(count = resolved, "Resolved refs");
        advance(stage, Stage::RefsResolved);

        validate(&self.schema, &mut merged, ValidationOptions::after_resolution())?;
        advance(stage, Stage::Done);

        info!(sources = ?loaded, "Configuration resolved");
        Ok((merged, deprecations))
    }

    /// Registry of functions from the manager and from every source.
    ///
    /// Built after merging because sources may need loaded values (such as
    /// credentials) to construct their function.
    fn build_evaluator(
        &self,
        merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<Arc<dyn Evaluator>> {
        let mut functions = FunctionEvaluator::new();
        for function in &self.functions {
            functions.register(function.clone());
        }
        for source in &self.sources {
            let Some(provider) = source.function_provider() else {
                continue;
            };
            let function = provider.build_function(merged, ctx)?;
            if functions.get(function.name()).is_some() {
                debug!(
                    source = %source.name(),
                    function = %function.name(),
                    "Function already registered, keeping the earlier one"
                );
                continue;
            }
            functions.register(function);
        }

        if self.evaluators.is_empty() {
            return Ok(Arc::new(functions));
        }
        let functions: Arc<dyn Evaluator> = Arc::new(functions);
        let mut combined = OneOfEvaluator::new(vec![functions]);
        for evaluator in &self.evaluators {
            combined.push(Arc::clone(evaluator));
        }
        Ok(Arc::new(combined))
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "Pipeline stage");
    *stage = next;
}

/// Fill undefined nodes from schema defaults, outermost first.
///
/// A default is skipped when an ancestor holds a non-object value, so that
/// validation still reports the bad ancestor.
fn apply_defaults(schema: &Schema, tree: &mut ConfigTree) -> usize {
    let mut applied = 0;
    for (path, default) in schema.defaults() {
        if tree.get(&path).is_some() || !ancestors_are_objects(&tree.value, &path) {
            continue;
        }
        tree.set(&path, default.clone(), Some(DEFAULT_ORIGIN));
        applied += 1;
    }
    applied
}

fn ancestors_are_objects(root: &Value, path: &ConfigPath) -> bool {
    let mut node = root;
    let segments = path.segments();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        let next = match (node, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key),
            _ => return false,
        };
        match next {
            None | Some(Value::Null) => return true,
            Some(child) if child.is_object() => node = child,
            Some(_) => return false,
        }
    }
    node.is_object() || node.is_null()
}

/// The outcome of a successful load.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    schema: Arc<Schema>,
    tree: ConfigTree,
    deprecations: Vec<Deprecation>,
}

impl LoadedConfig {
    pub fn value(&self) -> &Value {
        &self.tree.value
    }

    pub fn tree(&self) -> &ConfigTree {
        &self.tree
    }

    pub fn into_tree(self) -> ConfigTree {
        self.tree
    }

    /// Deprecated fields that were given a value, in schema order.
    pub fn deprecations(&self) -> &[Deprecation] {
        &self.deprecations
    }

    /// The value at a dotted path such as `server.port`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.tree.get(&ConfigPath::parse(path))
    }

    /// Where the value at a dotted path came from.
    pub fn origin(&self, path: &str) -> Option<&str> {
        self.tree.origin(&ConfigPath::parse(path))
    }

    /// Every leaf path with its origin.
    pub fn origins(&self) -> Vec<(ConfigPath, Option<String>)> {
        self.tree.origins()
    }

    /// Deserialize the resolved configuration into a typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> ResolveResult<T> {
        T::deserialize(&self.tree.value).map_err(|e| ResolveError::parse("configuration", e))
    }

    /// The resolved value with every secret replaced by [`REDACTED`].
    pub fn redacted(&self) -> Value {
        let mut value = self.tree.value.clone();
        redact(&self.schema, &mut value);
        value
    }
}

fn redact(schema: &Schema, value: &mut Value) {
    if value.is_null() {
        return;
    }
    match (&schema.kind, value) {
        (SchemaKind::Secret, value) => *value = Value::String(REDACTED.to_string()),
        (SchemaKind::Object(object), Value::Object(map)) => {
            for (name, child) in &object.properties {
                if let Some(child_value) = map.get_mut(name) {
                    redact(child, child_value);
                }
            }
        }
        (SchemaKind::Array(items), Value::Array(elements)) => {
            for element in elements {
                redact(items, element);
            }
        }
        (SchemaKind::Ref(reference), value) => redact(&reference.target, value),
        (SchemaKind::Union(alternatives) | SchemaKind::FatUnion(alternatives), value) => {
            if let Some(alternative) = alternatives.iter().find(|alt| accepts(alt, value)) {
                redact(alternative, value);
            }
        }
        _ => {}
    }
}
