//! Serde-loadable schema files.
//!
//! A schema file is YAML (or JSON, which YAML accepts) describing the same
//! tree the builder API produces:
//!
//! ```yaml
//! type: object
//! properties:
//!   port: { type: integer, default: 8080, env: [PORT] }
//!   tls:
//!     type: ref
//!     source: file
//!     target:
//!       type: object
//!       properties:
//!         cert: { type: string }
//! ```

use super::{ObjectSchema, Schema, SchemaKind, SchemaMeta};
use crate::error::{ResolveError, ResolveResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Node types accepted in a schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionType {
    String,
    Integer,
    Float,
    Boolean,
    Secret,
    Object,
    Array,
    Union,
    FatUnion,
    Ref,
}

/// One node of a schema file, before conversion to a [`Schema`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDefinition {
    #[serde(rename = "type")]
    pub kind: DefinitionType,

    /// Object children.
    #[serde(default)]
    pub properties: BTreeMap<String, SchemaDefinition>,

    /// Reject properties not listed in `properties`.
    #[serde(default)]
    pub strict: bool,

    /// Array item schema.
    #[serde(default)]
    pub items: Option<Box<SchemaDefinition>>,

    /// Union alternatives.
    #[serde(default)]
    pub any_of: Vec<SchemaDefinition>,

    /// Ref: name of the source that resolves the raw value.
    #[serde(default)]
    pub source: Option<String>,

    /// Ref: parameter that receives the raw string (default: `file`).
    #[serde(default = "default_ref_param")]
    pub param: String,

    /// Ref: fixed parameters passed alongside the raw string.
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Ref: schema of the resolved value.
    #[serde(default)]
    pub target: Option<Box<SchemaDefinition>>,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub optional: bool,

    /// Env aliases; a single string is accepted too.
    #[serde(default, deserialize_with = "one_or_many")]
    pub env: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub deprecated: Option<String>,

    #[serde(default = "default_coerce")]
    pub coerce: bool,
}

fn default_ref_param() -> String {
    "file".to_string()
}

fn default_coerce() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(name) => vec![name],
        OneOrMany::Many(names) => names,
    })
}

impl SchemaDefinition {
    /// Parse a YAML or JSON schema document.
    pub fn parse(content: &str, location: &str) -> ResolveResult<Self> {
        serde_yaml::from_str(content).map_err(|e| ResolveError::parse(location, e))
    }

    /// Convert into a [`Schema`], checking that each node has what its type needs.
    pub fn into_schema(self) -> ResolveResult<Schema> {
        self.convert("<root>")
    }

    fn convert(self, location: &str) -> ResolveResult<Schema> {
        let meta = SchemaMeta {
            default: self.default,
            optional: self.optional,
            env: self.env,
            description: self.description,
            deprecated: self.deprecated,
            coerce: self.coerce,
        };

        let kind = match self.kind {
            DefinitionType::String => SchemaKind::String,
            DefinitionType::Integer => SchemaKind::Integer,
            DefinitionType::Float => SchemaKind::Float,
            DefinitionType::Boolean => SchemaKind::Boolean,
            DefinitionType::Secret => SchemaKind::Secret,
            DefinitionType::Object => {
                let mut properties = BTreeMap::new();
                for (name, child) in self.properties {
                    let child_location = child_location(location, &name);
                    properties.insert(name, child.convert(&child_location)?);
                }
                SchemaKind::Object(ObjectSchema {
                    properties,
                    strict: self.strict,
                })
            }
            DefinitionType::Array => {
                let items = self
                    .items
                    .ok_or_else(|| invalid(location, "array requires 'items'"))?;
                SchemaKind::Array(Box::new(items.convert(&child_location(location, "items"))?))
            }
            DefinitionType::Union | DefinitionType::FatUnion => {
                if self.any_of.is_empty() {
                    return Err(invalid(location, "union requires at least one 'any_of' entry"));
                }
                let alternatives = self
                    .any_of
                    .into_iter()
                    .enumerate()
                    .map(|(i, alt)| alt.convert(&child_location(location, &i.to_string())))
                    .collect::<ResolveResult<Vec<_>>>()?;
                if self.kind == DefinitionType::Union {
                    SchemaKind::Union(alternatives)
                } else {
                    SchemaKind::FatUnion(alternatives)
                }
            }
            DefinitionType::Ref => {
                let source = self
                    .source
                    .ok_or_else(|| invalid(location, "ref requires 'source'"))?;
                let target = self
                    .target
                    .ok_or_else(|| invalid(location, "ref requires 'target'"))?
                    .convert(&child_location(location, "target"))?;
                let param = self.param;
                let fixed = self.params;
                let mut schema = Schema::reference(source, target, move |raw| {
                    let mut params = fixed.clone();
                    params.insert(param.clone(), Value::String(raw.to_string()));
                    params
                });
                schema.meta = meta;
                return Ok(schema);
            }
        };

        Ok(Schema { kind, meta })
    }
}

fn child_location(parent: &str, name: &str) -> String {
    if parent == "<root>" {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn invalid(location: &str, message: &str) -> ResolveError {
    ResolveError::parse(format!("schema at {}", location), message)
}

impl Schema {
    /// Parse a schema from YAML or JSON text.
    pub fn from_yaml_str(content: &str) -> ResolveResult<Schema> {
        SchemaDefinition::parse(content, "schema")?.into_schema()
    }

    /// Read and parse a schema file.
    pub fn from_path(path: &Path) -> ResolveResult<Schema> {
        let content = std::fs::read_to_string(path)?;
        SchemaDefinition::parse(&content, &path.display().to_string())?.into_schema()
    }
}
