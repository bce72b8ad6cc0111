//! Configuration trees with provenance.
//!
//! A [`ConfigTree`] pairs a plain JSON value with a [`Provenance`] structure
//! that mirrors it node for node. Provenance lives beside the value rather
//! than inside it, so ordinary key enumeration never sees origin data.

mod merge;

pub use merge::{merge, merge_all};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Origin label used for values filled in from schema defaults.
pub const DEFAULT_ORIGIN: &str = "default";

/// One step in a path through a configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// Object property name.
    Key(String),
    /// Array index.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

/// A path from the root of a configuration tree, rendered dotted.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigPath(Vec<Segment>);

impl ConfigPath {
    /// The empty (root) path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path. Purely numeric segments become array indices;
    /// lookups fall back to the property of the same name on objects.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(
            dotted
                .split('.')
                .map(|part| match part.parse::<usize>() {
                    Ok(index) => Segment::Index(index),
                    Err(_) => Segment::Key(part.to_string()),
                })
                .collect(),
        )
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Object keys along the path, skipping array indices.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|segment| match segment {
            Segment::Key(key) => Some(key.as_str()),
            Segment::Index(_) => None,
        })
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Serialize for ConfigPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Provenance information for one node of a configuration tree.
///
/// `origin` describes where the node's value came from. `children` is keyed
/// by the same property names or array indices as the value it shadows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub origin: Option<String>,
    /// Marks an object value as non-mergeable: merges never descend into it.
    pub opaque: bool,
    pub children: BTreeMap<Segment, Provenance>,
}

impl Provenance {
    /// A leaf provenance carrying only an origin.
    pub fn leaf(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..Self::default()
        }
    }

    /// Build a provenance tree that assigns `origin` to every node of `value`.
    pub fn uniform(value: &Value, origin: &str) -> Self {
        let mut provenance = Self::leaf(origin);
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    provenance
                        .children
                        .insert(Segment::Key(key.clone()), Self::uniform(child, origin));
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    provenance
                        .children
                        .insert(Segment::Index(index), Self::uniform(child, origin));
                }
            }
            _ => {}
        }
        provenance
    }

    pub fn child(&self, segment: &Segment) -> Option<&Provenance> {
        self.children.get(segment).or_else(|| match segment {
            Segment::Index(index) => self.children.get(&Segment::Key(index.to_string())),
            Segment::Key(_) => None,
        })
    }

    pub fn child_mut(&mut self, segment: Segment) -> &mut Provenance {
        let key = match &segment {
            Segment::Index(index) => Some(Segment::Key(index.to_string())),
            Segment::Key(_) => None,
        };
        let segment = match key {
            Some(key)
                if !self.children.contains_key(&segment) && self.children.contains_key(&key) =>
            {
                key
            }
            _ => segment,
        };
        self.children.entry(segment).or_default()
    }

    /// Look up the provenance node at `path`.
    pub fn at(&self, path: &ConfigPath) -> Option<&Provenance> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Get or create the provenance node at `path`.
    pub fn at_mut(&mut self, path: &ConfigPath) -> &mut Provenance {
        path.segments()
            .iter()
            .fold(self, |node, segment| node.child_mut(segment.clone()))
    }

    /// The nearest recorded origin at or above `path`.
    pub fn origin_of(&self, path: &ConfigPath) -> Option<&str> {
        let mut node = self;
        let mut found = node.origin.as_deref();
        for segment in path.segments() {
            match node.child(segment) {
                Some(child) => {
                    node = child;
                    if let Some(origin) = node.origin.as_deref() {
                        found = Some(origin);
                    }
                }
                None => break,
            }
        }
        found
    }

    /// Shift array-index children by `offset` (used when appending arrays).
    pub(crate) fn shifted(&self, offset: usize) -> BTreeMap<Segment, Provenance> {
        self.children
            .iter()
            .map(|(segment, child)| match segment {
                Segment::Index(index) => (Segment::Index(index + offset), child.clone()),
                Segment::Key(key) => (Segment::Key(key.clone()), child.clone()),
            })
            .collect()
    }
}

/// A configuration value tree plus its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    pub value: Value,
    pub provenance: Provenance,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigTree {
    /// An empty object with no provenance.
    pub fn empty() -> Self {
        Self {
            value: Value::Object(Map::new()),
            provenance: Provenance::default(),
        }
    }

    pub fn new(value: Value, provenance: Provenance) -> Self {
        Self { value, provenance }
    }

    /// Wrap `value`, attributing every node to `origin`.
    pub fn with_origin(value: Value, origin: &str) -> Self {
        let provenance = Provenance::uniform(&value, origin);
        Self { value, provenance }
    }

    /// Get the value at `path`, if defined.
    pub fn get(&self, path: &ConfigPath) -> Option<&Value> {
        lookup(&self.value, path).filter(|value| !value.is_null())
    }

    pub fn get_mut(&mut self, path: &ConfigPath) -> Option<&mut Value> {
        path.segments()
            .iter()
            .try_fold(&mut self.value, |node, segment| match (node, segment) {
                (Value::Object(map), Segment::Key(key)) => map.get_mut(key),
                (Value::Object(map), Segment::Index(index)) => map.get_mut(&index.to_string()),
                (Value::Array(items), Segment::Index(index)) => items.get_mut(*index),
                _ => None,
            })
    }

    /// The origin recorded for `path` (or the nearest ancestor that has one).
    pub fn origin(&self, path: &ConfigPath) -> Option<&str> {
        self.provenance.origin_of(path)
    }

    /// Set the value at `path`, creating intermediate objects as needed.
    ///
    /// Intermediate nodes that exist but are not objects are replaced.
    pub fn set(&mut self, path: &ConfigPath, value: Value, origin: Option<&str>) {
        insert_at(&mut self.value, path.segments(), value);
        let node = self.provenance.at_mut(path);
        if let Some(origin) = origin {
            node.origin = Some(origin.to_string());
        }
    }

    /// Replace the subtree at `path` with another tree, provenance included.
    pub fn graft(&mut self, path: &ConfigPath, tree: ConfigTree) {
        if path.is_root() {
            *self = tree;
            return;
        }
        insert_at(&mut self.value, path.segments(), tree.value);
        let node = self.provenance.at_mut(path);
        let previous_origin = node.origin.take();
        *node = tree.provenance;
        if node.origin.is_none() {
            node.origin = previous_origin;
        }
    }

    /// Every defined leaf value with its path and origin, in key order.
    pub fn origins(&self) -> Vec<(ConfigPath, Option<String>)> {
        let mut out = Vec::new();
        collect_leaves(&self.value, &self.provenance, &ConfigPath::root(), None, &mut out);
        out
    }
}

fn lookup<'a>(value: &'a Value, path: &ConfigPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(value, |node, segment| match (node, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key),
            (Value::Object(map), Segment::Index(index)) => map.get(&index.to_string()),
            (Value::Array(items), Segment::Index(index)) => items.get(*index),
            _ => None,
        })
}

fn insert_at(root: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *root = value;
        return;
    };
    match first {
        Segment::Key(key) => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            if let Value::Object(map) = root {
                let slot = map.entry(key.clone()).or_insert(Value::Null);
                insert_at(slot, rest, value);
            }
        }
        // An index into an existing object addresses the numeric property
        Segment::Index(index) if root.is_object() => {
            if let Value::Object(map) = root {
                let slot = map.entry(index.to_string()).or_insert(Value::Null);
                insert_at(slot, rest, value);
            }
        }
        Segment::Index(index) => {
            if !root.is_array() {
                *root = Value::Array(Vec::new());
            }
            if let Value::Array(items) = root {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                insert_at(&mut items[*index], rest, value);
            }
        }
    }
}

fn collect_leaves(
    value: &Value,
    provenance: &Provenance,
    path: &ConfigPath,
    inherited: Option<&str>,
    out: &mut Vec<(ConfigPath, Option<String>)>,
) {
    let origin = provenance.origin.as_deref().or(inherited);
    let empty = Provenance::default();
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let segment = Segment::Key(key.clone());
                let child_provenance = provenance.child(&segment).unwrap_or(&empty);
                collect_leaves(child, child_provenance, &path.child(segment), origin, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                let segment = Segment::Index(index);
                let child_provenance = provenance.child(&segment).unwrap_or(&empty);
                collect_leaves(child, child_provenance, &path.child(segment), origin, out);
            }
        }
        Value::Null => {}
        _ => out.push((path.clone(), origin.map(str::to_string))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_parse_and_display() {
        let path = ConfigPath::parse("servers.0.host");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("servers".into()),
                Segment::Index(0),
                Segment::Key("host".into())
            ]
        );
        assert_eq!(path.to_string(), "servers.0.host");
        assert!(ConfigPath::parse("").is_root());
    }

    #[test]
    fn test_numeric_segments_address_object_properties() {
        let mut tree = ConfigTree::with_origin(json!({"pages": {"404": "nf.html"}}), "site.yaml");
        let path = ConfigPath::parse("pages.404");

        assert_eq!(tree.get(&path), Some(&json!("nf.html")));
        assert_eq!(tree.origin(&path), Some("site.yaml"));

        tree.set(&path, json!("missing.html"), Some("args:--pages.404"));
        assert_eq!(tree.value, json!({"pages": {"404": "missing.html"}}));
        assert_eq!(tree.origin(&path), Some("args:--pages.404"));
        assert_eq!(tree.provenance.at(&ConfigPath::parse("pages")).unwrap().children.len(), 1);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut tree = ConfigTree::empty();
        tree.set(&ConfigPath::parse("db.pool.size"), json!(4), Some("envs:DB_POOL_SIZE"));

        assert_eq!(tree.value, json!({"db": {"pool": {"size": 4}}}));
        assert_eq!(
            tree.origin(&ConfigPath::parse("db.pool.size")),
            Some("envs:DB_POOL_SIZE")
        );
    }

    #[test]
    fn test_origin_falls_back_to_ancestor() {
        let tree = ConfigTree::with_origin(json!({"db": {"host": "x"}}), "/etc/app.yaml");
        let mut provenance = tree.provenance.clone();
        provenance.at_mut(&ConfigPath::parse("db.host")).origin = None;
        let tree = ConfigTree::new(tree.value, provenance);

        assert_eq!(tree.origin(&ConfigPath::parse("db.host")), Some("/etc/app.yaml"));
    }

    #[test]
    fn test_null_is_undefined() {
        let tree = ConfigTree::with_origin(json!({"a": null}), "x");
        assert!(tree.get(&ConfigPath::parse("a")).is_none());
    }

    #[test]
    fn test_graft_keeps_previous_origin_when_missing() {
        let mut tree = ConfigTree::with_origin(json!({"db": "file.json"}), "envs:DB");
        let replacement = ConfigTree::new(json!({"host": "h"}), Provenance::default());
        tree.graft(&ConfigPath::parse("db"), replacement);

        assert_eq!(tree.value, json!({"db": {"host": "h"}}));
        assert_eq!(tree.origin(&ConfigPath::parse("db.host")), Some("envs:DB"));
    }

    #[test]
    fn test_origins_lists_leaves() {
        let tree = ConfigTree::with_origin(json!({"a": 1, "b": {"c": [true]}}), "memory");
        let origins = tree.origins();
        let paths: Vec<String> = origins.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["a", "b.c.0"]);
        assert!(origins.iter().all(|(_, o)| o.as_deref() == Some("memory")));
    }
}
