//! Configuration sources.
//!
//! Every source bulk-loads a partial tree for the manager to merge. A source
//! may additionally resolve single values for `ref` nodes
//! ([`ValueResolver`]) and contribute an indirection function
//! ([`FunctionProvider`]).

mod args;
mod env;
mod file;
mod memory;

pub use args::ArgsSource;
pub use env::EnvSource;
pub use file::FileSource;
pub use memory::MemorySource;

use crate::error::{ResolveError, ResolveResult};
use crate::indirection::EvaluatorFunction;
use crate::schema::Schema;
use crate::tree::ConfigTree;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Dependencies injected into every source call.
#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    pub env: BTreeMap<String, String>,
    /// Command line arguments, without the program name.
    pub argv: Vec<String>,
    /// Base directory for relative paths.
    pub cwd: PathBuf,
    /// Free-form values for custom sources (credentials, clients, ...).
    pub extras: Map<String, Value>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self {
            cwd: PathBuf::from("."),
            ..Self::default()
        }
    }

    /// Snapshot the current process: environment, arguments and working directory.
    pub fn from_process() -> Self {
        Self {
            env: std::env::vars().collect(),
            argv: std::env::args().skip(1).collect(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            extras: Map::new(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_args<S: Into<String>>(mut self, argv: impl IntoIterator<Item = S>) -> Self {
        self.argv = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Expand `~/` and anchor relative paths at `cwd`.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = match raw.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => PathBuf::from(raw),
            },
            None => PathBuf::from(raw),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        }
    }
}

/// Result of resolving a single `ref` value.
///
/// The tag is always chosen by the source, never inferred from the shape of
/// the value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// An object whose own refs are resolved recursively before substitution.
    Mergeable(ConfigTree),
    /// A terminal value; objects returned this way are never merged into.
    NonMergeable { value: Value, origin: String },
}

/// A provider of configuration values.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used by `ref` nodes to address this source.
    fn name(&self) -> &str;

    /// Load everything this source contributes for `schema`.
    ///
    /// `merged` holds what higher-precedence sources already produced. Every
    /// contributed value must carry an origin.
    async fn load(
        &self,
        schema: &Schema,
        merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<ConfigTree>;

    fn value_resolver(&self) -> Option<&dyn ValueResolver> {
        None
    }

    fn function_provider(&self) -> Option<&dyn FunctionProvider> {
        None
    }
}

/// Resolve a single value from source-specific parameters.
#[async_trait]
pub trait ValueResolver: Send + Sync {
    async fn resolve_single(
        &self,
        params: &Map<String, Value>,
        target: &Schema,
        ctx: &LoadContext,
        merged: &ConfigTree,
    ) -> ResolveResult<Resolved>;
}

/// Build an indirection function once the first merge pass is complete.
pub trait FunctionProvider: Send + Sync {
    fn build_function(
        &self,
        merged: &ConfigTree,
        ctx: &LoadContext,
    ) -> ResolveResult<EvaluatorFunction>;
}

/// Split a comma-separated list, trimming items and dropping empty ones.
pub(crate) fn split_list(raw: &str) -> impl Iterator<Item = Value> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| Value::String(item.to_string()))
}

/// Parse structured file content by extension; `None` for unstructured files.
pub(crate) fn parse_structured(path: &Path, content: &str) -> Option<ResolveResult<Value>> {
    let location = path.display().to_string();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            Some(serde_json::from_str(content).map_err(|e| ResolveError::parse(location, e)))
        }
        Some("yaml") | Some("yml") => Some(
            serde_yaml::from_str::<Option<Value>>(content)
                .map(|value| value.unwrap_or_else(|| Value::Object(Map::new())))
                .map_err(|e| ResolveError::parse(location, e)),
        ),
        _ => None,
    }
}
