//! Output formatting for resolved configuration, provenance and schemas.

use crate::error::{ResolveError, ResolveResult};
use crate::schema::Schema;
use crate::tree::ConfigPath;
use serde_json::Value;

/// Output format for resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "yaml" | "yml" => Some(OutputFormat::Yaml),
            _ => None,
        }
    }
}

/// Render a configuration value in the requested format.
pub fn render(value: &Value, format: OutputFormat) -> ResolveResult<String> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| ResolveError::parse("output", e))
        }
        OutputFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| ResolveError::parse("output", e))
        }
    }
}

/// Format leaf origins as a markdown table.
pub fn format_origins_markdown(origins: &[(ConfigPath, Option<String>)]) -> String {
    let mut md = String::new();
    md.push_str("| path | origin |\n");
    md.push_str("|------|--------|\n");
    for (path, origin) in origins {
        md.push_str(&format!(
            "| `{}` | {} |\n",
            path,
            origin.as_deref().unwrap_or("-")
        ));
    }
    md
}

/// Format schema leaves as a markdown list.
pub fn format_schema_markdown(schema: &Schema) -> String {
    let leaves = schema.leaves();
    let mut md = String::new();

    md.push_str(&format!("# Schema ({} fields)\n\n", leaves.len()));
    for (path, leaf) in leaves {
        let name = if path.is_root() {
            "<root>".to_string()
        } else {
            path.to_string()
        };
        md.push_str(&format!("- **{}**: {}", name, leaf.type_name()));

        let mut notes = Vec::new();
        if leaf.meta.optional {
            notes.push("optional".to_string());
        }
        if let Some(default) = &leaf.meta.default {
            notes.push(format!("default `{}`", default));
        }
        if !leaf.meta.env.is_empty() {
            notes.push(format!("env {}", leaf.meta.env.join(", ")));
        }
        if leaf.meta.deprecated.is_some() {
            notes.push("deprecated".to_string());
        }
        if !notes.is_empty() {
            md.push_str(&format!(" ({})", notes.join("; ")));
        }
        if let Some(description) = &leaf.meta.description {
            md.push_str(&format!(" - {}", description));
        }
        md.push('\n');
    }

    md
}
