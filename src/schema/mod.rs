//! Schema model describing the shape of a configuration.
//!
//! A [`Schema`] is a tree of typed nodes built once by the caller and read by
//! every other component. Leaves carry coercion and metadata (defaults, env
//! aliases, secrecy, deprecation); branches describe objects, arrays, unions
//! and refs to values that must be fetched from a named source.

mod definition;
mod validate;

pub use definition::SchemaDefinition;
pub use validate::{accepts, validate, Deprecation, ValidationOptions};

use crate::tree::{ConfigPath, Segment};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Converts a ref's raw string into parameters for the owning source.
pub type RefParamsFn = Arc<dyn Fn(&str) -> Map<String, Value> + Send + Sync>;

/// A node of the configuration schema.
#[derive(Clone)]
pub struct Schema {
    pub kind: SchemaKind,
    pub meta: SchemaMeta,
}

/// The type of a schema node.
#[derive(Clone)]
pub enum SchemaKind {
    String,
    Integer,
    Float,
    Boolean,
    /// A string that must never be echoed back in logs or errors.
    Secret,
    Object(ObjectSchema),
    Array(Box<Schema>),
    /// First matching alternative wins; failures report a single message.
    Union(Vec<Schema>),
    /// Like `Union`, but failures report every alternative's errors.
    FatUnion(Vec<Schema>),
    Ref(RefSchema),
}

/// Metadata shared by all schema nodes.
#[derive(Debug, Clone)]
pub struct SchemaMeta {
    pub default: Option<Value>,
    pub optional: bool,
    /// Environment variable names that feed this leaf, in priority order.
    pub env: Vec<String>,
    pub description: Option<String>,
    /// Deprecation notice; a value present for this field triggers a warning.
    pub deprecated: Option<String>,
    /// Whether string input may be coerced to this node's scalar type.
    pub coerce: bool,
}

impl Default for SchemaMeta {
    fn default() -> Self {
        Self {
            default: None,
            optional: false,
            env: Vec::new(),
            description: None,
            deprecated: None,
            coerce: true,
        }
    }
}

/// Named children of an object node.
#[derive(Clone, Default)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, Schema>,
    /// Reject properties not declared in `properties`.
    pub strict: bool,
}

impl ObjectSchema {
    /// Children that are not wrapped optional.
    pub fn required(&self) -> impl Iterator<Item = (&String, &Schema)> {
        self.properties
            .iter()
            .filter(|(_, schema)| !schema.meta.optional)
    }
}

/// A pointer to a value that a named source resolves after loading.
#[derive(Clone)]
pub struct RefSchema {
    pub source: String,
    pub to_params: RefParamsFn,
    pub target: Box<Schema>,
}

impl RefSchema {
    /// Parameters for the owning source derived from the raw string.
    pub fn params_for(&self, raw: &str) -> Map<String, Value> {
        (self.to_params)(raw)
    }
}

impl fmt::Debug for RefSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefSchema")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ObjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSchema")
            .field("properties", &self.properties)
            .field("strict", &self.strict)
            .finish()
    }
}

impl fmt::Debug for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Object(object) => f.debug_tuple("Object").field(object).finish(),
            SchemaKind::Array(items) => f.debug_tuple("Array").field(items).finish(),
            SchemaKind::Union(alternatives) => f.debug_tuple("Union").field(alternatives).finish(),
            SchemaKind::FatUnion(alternatives) => {
                f.debug_tuple("FatUnion").field(alternatives).finish()
            }
            SchemaKind::Ref(reference) => f.debug_tuple("Ref").field(reference).finish(),
            scalar => write!(f, "{}", scalar.type_name()),
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("kind", &self.kind)
            .field("meta", &self.meta)
            .finish()
    }
}

impl SchemaKind {
    /// Human-readable type name used in messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaKind::String => "string",
            SchemaKind::Integer => "integer",
            SchemaKind::Float => "float",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Secret => "secret",
            SchemaKind::Object(_) => "object",
            SchemaKind::Array(_) => "array",
            SchemaKind::Union(_) => "union",
            SchemaKind::FatUnion(_) => "fat_union",
            SchemaKind::Ref(_) => "ref",
        }
    }
}

// Builders

impl Schema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            meta: SchemaMeta::default(),
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaKind::String)
    }

    pub fn integer() -> Self {
        Self::of(SchemaKind::Integer)
    }

    pub fn float() -> Self {
        Self::of(SchemaKind::Float)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaKind::Boolean)
    }

    pub fn secret() -> Self {
        Self::of(SchemaKind::Secret)
    }

    /// An object node from `(name, schema)` pairs.
    pub fn object<K: Into<String>>(properties: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Self::of(SchemaKind::Object(ObjectSchema {
            properties: properties
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
            strict: false,
        }))
    }

    pub fn array(items: Schema) -> Self {
        Self::of(SchemaKind::Array(Box::new(items)))
    }

    pub fn union(alternatives: impl IntoIterator<Item = Schema>) -> Self {
        Self::of(SchemaKind::Union(alternatives.into_iter().collect()))
    }

    pub fn fat_union(alternatives: impl IntoIterator<Item = Schema>) -> Self {
        Self::of(SchemaKind::FatUnion(alternatives.into_iter().collect()))
    }

    /// A ref resolved by `source`, passing the raw string through `to_params`.
    pub fn reference<F>(source: impl Into<String>, target: Schema, to_params: F) -> Self
    where
        F: Fn(&str) -> Map<String, Value> + Send + Sync + 'static,
    {
        Self::of(SchemaKind::Ref(RefSchema {
            source: source.into(),
            to_params: Arc::new(to_params),
            target: Box::new(target),
        }))
    }

    /// A ref whose raw string is passed to `source` as the `file` parameter.
    pub fn file_ref(source: impl Into<String>, target: Schema) -> Self {
        Self::reference(source, target, |raw| {
            let mut params = Map::new();
            params.insert("file".into(), Value::String(raw.to_string()));
            params.insert("encoding".into(), Value::String("utf8".into()));
            params
        })
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.meta.default = Some(value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.meta.optional = true;
        self
    }

    /// Add an environment variable alias for this leaf.
    pub fn env(mut self, name: impl Into<String>) -> Self {
        self.meta.env.push(name.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.meta.description = Some(text.into());
        self
    }

    pub fn deprecated(mut self, notice: impl Into<String>) -> Self {
        self.meta.deprecated = Some(notice.into());
        self
    }

    pub fn no_coerce(mut self) -> Self {
        self.meta.coerce = false;
        self
    }

    /// Reject unknown properties (objects only; no-op otherwise).
    pub fn strict(mut self) -> Self {
        if let SchemaKind::Object(object) = &mut self.kind {
            object.strict = true;
        }
        self
    }
}

// Queries

impl Schema {
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.kind, SchemaKind::Secret)
    }

    /// The child schema for one path segment, if the node has one.
    pub fn child(&self, segment: &Segment) -> Option<&Schema> {
        match (&self.kind, segment) {
            (SchemaKind::Object(object), Segment::Key(key)) => object.properties.get(key),
            (SchemaKind::Object(object), Segment::Index(index)) => {
                object.properties.get(&index.to_string())
            }
            (SchemaKind::Array(items), Segment::Index(_)) => Some(items),
            (SchemaKind::Ref(reference), _) => reference.target.child(segment),
            _ => None,
        }
    }

    /// The schema node at `path`.
    pub fn at(&self, path: &ConfigPath) -> Option<&Schema> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Every leaf reachable through object properties, depth first.
    ///
    /// Arrays, unions and refs count as leaves: their contents are not
    /// addressable by a fixed path.
    pub fn leaves(&self) -> Vec<(ConfigPath, &Schema)> {
        let mut out = Vec::new();
        self.collect_leaves(&ConfigPath::root(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, path: &ConfigPath, out: &mut Vec<(ConfigPath, &'a Schema)>) {
        match &self.kind {
            SchemaKind::Object(object) => {
                for (name, child) in &object.properties {
                    child.collect_leaves(&path.child(name.as_str()), out);
                }
            }
            _ => out.push((path.clone(), self)),
        }
    }

    /// Every node (branches included) that carries a default value.
    pub fn defaults(&self) -> Vec<(ConfigPath, &Value)> {
        let mut out = Vec::new();
        self.collect_defaults(&ConfigPath::root(), &mut out);
        out
    }

    fn collect_defaults<'a>(&'a self, path: &ConfigPath, out: &mut Vec<(ConfigPath, &'a Value)>) {
        if let Some(default) = &self.meta.default {
            out.push((path.clone(), default));
        }
        if let SchemaKind::Object(object) = &self.kind {
            for (name, child) in &object.properties {
                child.collect_defaults(&path.child(name.as_str()), out);
            }
        }
    }

    /// Whether any ref node exists below (or at) this node.
    pub fn contains_refs(&self) -> bool {
        match &self.kind {
            SchemaKind::Ref(_) => true,
            SchemaKind::Object(object) => object.properties.values().any(Schema::contains_refs),
            SchemaKind::Array(items) => items.contains_refs(),
            SchemaKind::Union(alternatives) | SchemaKind::FatUnion(alternatives) => {
                alternatives.iter().any(Schema::contains_refs)
            }
            _ => false,
        }
    }
}
