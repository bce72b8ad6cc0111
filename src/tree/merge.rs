//! Origin-tracking deep merge for configuration trees.
//!
//! Merges walk the value and its provenance in lock-step. The tree being
//! merged into has precedence: its defined values are never overwritten.
//!
//! - Missing or `null` values in the target are filled from the source,
//!   provenance included
//! - Objects are merged recursively unless either side is marked opaque
//! - Arrays are concatenated (target items first), never merged element-wise;
//!   every item keeps the origin of the array it came from
//! - Any other conflict keeps the target's value and origin

use super::{ConfigTree, Provenance, Segment};
use serde_json::Value;

/// Merge `source` into `target`, with `target` taking precedence.
///
/// Merging the same source twice leaves non-array values unchanged the second
/// time; arrays are concatenated on every call.
///
/// # Example
/// ```
/// use serde_json::json;
/// use stratum_config::tree::{merge, ConfigTree, ConfigPath};
///
/// let mut target = ConfigTree::with_origin(json!({"x": 1}), "A");
/// let source = ConfigTree::with_origin(json!({"x": 2, "y": 3}), "B");
/// merge(&mut target, &source);
/// assert_eq!(target.value, json!({"x": 1, "y": 3}));
/// assert_eq!(target.origin(&ConfigPath::parse("x")), Some("A"));
/// assert_eq!(target.origin(&ConfigPath::parse("y")), Some("B"));
/// ```
pub fn merge<'a>(target: &'a mut ConfigTree, source: &ConfigTree) -> &'a mut ConfigTree {
    merge_node(
        &mut target.value,
        &mut target.provenance,
        &source.value,
        &source.provenance,
    );
    target
}

/// Merge trees in order; the first tree has the highest precedence.
pub fn merge_all(trees: impl IntoIterator<Item = ConfigTree>) -> ConfigTree {
    trees.into_iter().fold(ConfigTree::empty(), |mut acc, tree| {
        merge(&mut acc, &tree);
        acc
    })
}

fn merge_node(
    target: &mut Value,
    target_provenance: &mut Provenance,
    source: &Value,
    source_provenance: &Provenance,
) {
    // Undefined target: take the source wholesale
    if target.is_null() {
        if !source.is_null() {
            *target = source.clone();
            *target_provenance = source_provenance.clone();
        }
        return;
    }

    let mergeable = !target_provenance.opaque && !source_provenance.opaque;
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) if mergeable => {
            if target_provenance.origin.is_none() {
                target_provenance.origin = source_provenance.origin.clone();
            }
            for (key, source_value) in source_map {
                let segment = Segment::Key(key.clone());
                let empty = Provenance::default();
                let child_source = source_provenance.child(&segment).unwrap_or(&empty);
                match target_map.get_mut(key) {
                    Some(existing) => merge_node(
                        existing,
                        target_provenance.child_mut(segment),
                        source_value,
                        child_source,
                    ),
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                        if let Some(child) = source_provenance.child(&segment) {
                            target_provenance.children.insert(segment, child.clone());
                        }
                    }
                }
            }
        }
        (Value::Array(target_items), Value::Array(source_items)) => {
            let offset = target_items.len();
            pin_item_origins(target_provenance, offset);
            let mut appended = source_provenance.clone();
            pin_item_origins(&mut appended, source_items.len());

            target_items.extend(source_items.iter().cloned());
            target_provenance.children.extend(appended.shifted(offset));
        }
        // Target already defines a value: first source wins
        _ => {}
    }
}

/// Give every item of an array its array's origin unless it records its own,
/// so items keep their origin once arrays from different sources are joined.
fn pin_item_origins(provenance: &mut Provenance, len: usize) {
    let Some(origin) = provenance.origin.clone() else {
        return;
    };
    for index in 0..len {
        let item = provenance.child_mut(Segment::Index(index));
        if item.origin.is_none() {
            item.origin = Some(origin.clone());
        }
    }
}
