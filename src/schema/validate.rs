//! Structural validation with string coercion.
//!
//! Validation walks the schema and the configuration tree together, coercing
//! string input (env vars, CLI flags) to the declared scalar types in place.
//! Every offending field is collected; nothing short-circuits per field.

use super::{Schema, SchemaKind};
use crate::error::{FieldError, ValidationErrors};
use crate::indirection::is_indirection_expression;
use crate::tree::{ConfigPath, ConfigTree, Provenance, Segment};
use serde_json::{Number, Value};
use std::cell::RefCell;

/// Switches that differ between the pre- and post-resolution passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// Accept indirection expressions anywhere and raw strings for refs.
    pub allow_deferred: bool,
    /// Report every deprecated field that has a value.
    pub report_deprecated: bool,
}

/// A deprecated field that holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub path: ConfigPath,
    pub origin: Option<String>,
    pub notice: String,
}

impl ValidationOptions {
    /// Options for validating freshly merged input.
    pub fn before_resolution() -> Self {
        Self {
            allow_deferred: true,
            report_deprecated: true,
        }
    }

    /// Options for validating the fully resolved tree.
    pub fn after_resolution() -> Self {
        Self::default()
    }
}

/// Validate `tree` against `schema`, coercing values in place.
///
/// On success returns the deprecated fields in use, each reported once.
pub fn validate(
    schema: &Schema,
    tree: &mut ConfigTree,
    options: ValidationOptions,
) -> Result<Vec<Deprecation>, ValidationErrors> {
    let ConfigTree { value, provenance } = tree;
    let mut errors = Vec::new();
    let walker = Walker::new(options);
    if !value.is_null() {
        walker.check(
            schema,
            value,
            Some(&*provenance),
            &ConfigPath::root(),
            None,
            &mut errors,
        );
    } else if !can_be_absent(schema) {
        errors.push(FieldError::new(ConfigPath::root(), None, "is required"));
    }
    if errors.is_empty() {
        Ok(walker.deprecations.into_inner())
    } else {
        Err(ValidationErrors::new(errors))
    }
}

/// Whether `value` conforms to `schema`, treating deferred values as valid.
pub fn accepts(schema: &Schema, value: &Value) -> bool {
    let walker = Walker::new(ValidationOptions {
        allow_deferred: true,
        report_deprecated: false,
    });
    let mut scratch = value.clone();
    let mut errors = Vec::new();
    walker.check(
        schema,
        &mut scratch,
        None,
        &ConfigPath::root(),
        None,
        &mut errors,
    );
    errors.is_empty()
}

/// Absent nodes are fine when optional or when nothing below is required.
fn can_be_absent(schema: &Schema) -> bool {
    if schema.meta.optional {
        return true;
    }
    match &schema.kind {
        SchemaKind::Object(object) => object.required().all(|(_, child)| can_be_absent(child)),
        _ => false,
    }
}

struct Walker {
    options: ValidationOptions,
    deprecations: RefCell<Vec<Deprecation>>,
}

impl Walker {
    fn new(options: ValidationOptions) -> Self {
        Self {
            options,
            deprecations: RefCell::new(Vec::new()),
        }
    }

    /// Run one union alternative; deprecations it found are dropped on failure.
    fn attempt(
        &self,
        schema: &Schema,
        value: &mut Value,
        provenance: Option<&Provenance>,
        path: &ConfigPath,
        origin: Option<&str>,
    ) -> Vec<FieldError> {
        let mark = self.deprecations.borrow().len();
        let mut errors = Vec::new();
        self.check(schema, value, provenance, path, origin, &mut errors);
        if !errors.is_empty() {
            self.deprecations.borrow_mut().truncate(mark);
        }
        errors
    }

    fn check(
        &self,
        schema: &Schema,
        value: &mut Value,
        provenance: Option<&Provenance>,
        path: &ConfigPath,
        inherited: Option<&str>,
        errors: &mut Vec<FieldError>,
    ) {
        let origin = provenance
            .and_then(|p| p.origin.as_deref())
            .or(inherited);

        if self.options.report_deprecated
            && let Some(notice) = &schema.meta.deprecated
        {
            self.deprecations.borrow_mut().push(Deprecation {
                path: path.clone(),
                origin: origin.map(str::to_string),
                notice: notice.clone(),
            });
        }

        if self.options.allow_deferred
            && let Value::String(raw) = value
            && is_indirection_expression(raw)
        {
            return;
        }

        let fail = |errors: &mut Vec<FieldError>, message: String| {
            errors.push(FieldError::new(
                path.clone(),
                origin.map(str::to_string),
                message,
            ));
        };

        match &schema.kind {
            SchemaKind::String => {
                if let Some(coerced) = coerce_string(value, schema.meta.coerce) {
                    *value = coerced;
                } else if !value.is_string() {
                    fail(errors, format!("expected string, got {}", value));
                }
            }
            SchemaKind::Secret => {
                if let Some(coerced) = coerce_string(value, schema.meta.coerce) {
                    *value = coerced;
                } else if !value.is_string() {
                    fail(errors, "expected secret string, got <redacted>".to_string());
                }
            }
            SchemaKind::Integer => match coerce_integer(value, schema.meta.coerce) {
                Some(coerced) => *value = coerced,
                None => fail(errors, format!("expected integer, got {}", value)),
            },
            SchemaKind::Float => match coerce_float(value, schema.meta.coerce) {
                Some(coerced) => *value = coerced,
                None => fail(errors, format!("expected float, got {}", value)),
            },
            SchemaKind::Boolean => match coerce_boolean(value, schema.meta.coerce) {
                Some(coerced) => *value = coerced,
                None => fail(errors, format!("expected boolean, got {}", value)),
            },
            SchemaKind::Object(object) => {
                let map = match value {
                    Value::Object(map) => map,
                    other => {
                        fail(errors, format!("expected object, got {}", other));
                        return;
                    }
                };
                for (name, child_schema) in &object.properties {
                    let segment = Segment::Key(name.clone());
                    let child_path = path.child(segment.clone());
                    match map.get_mut(name) {
                        Some(child) if !child.is_null() => self.check(
                            child_schema,
                            child,
                            provenance.and_then(|p| p.child(&segment)),
                            &child_path,
                            origin,
                            errors,
                        ),
                        _ => {
                            if !can_be_absent(child_schema) {
                                errors.push(FieldError::new(child_path, None, "is required"));
                            }
                        }
                    }
                }
                if object.strict {
                    for key in map.keys() {
                        if !object.properties.contains_key(key) {
                            let segment = Segment::Key(key.clone());
                            let key_origin = provenance
                                .and_then(|p| p.child(&segment))
                                .and_then(|p| p.origin.as_deref())
                                .or(origin);
                            errors.push(FieldError::new(
                                path.child(segment),
                                key_origin.map(str::to_string),
                                "unknown property",
                            ));
                        }
                    }
                }
            }
            SchemaKind::Array(items) => {
                let elements = match value {
                    Value::Array(elements) => elements,
                    other => {
                        fail(errors, format!("expected array, got {}", other));
                        return;
                    }
                };
                for (index, element) in elements.iter_mut().enumerate() {
                    let segment = Segment::Index(index);
                    if element.is_null() {
                        errors.push(FieldError::new(
                            path.child(segment),
                            origin.map(str::to_string),
                            "array items must not be null",
                        ));
                        continue;
                    }
                    self.check(
                        items,
                        element,
                        provenance.and_then(|p| p.child(&segment)),
                        &path.child(segment.clone()),
                        origin,
                        errors,
                    );
                }
            }
            SchemaKind::Union(alternatives) => {
                if !self.first_match(alternatives, value, provenance, path, origin) {
                    let names: Vec<&str> = alternatives.iter().map(Schema::type_name).collect();
                    fail(
                        errors,
                        format!("does not match any alternative ({})", names.join(" | ")),
                    );
                }
            }
            SchemaKind::FatUnion(alternatives) => {
                let mut collected = Vec::new();
                for alternative in alternatives {
                    let mut candidate = value.clone();
                    let attempt =
                        self.attempt(alternative, &mut candidate, provenance, path, origin);
                    if attempt.is_empty() {
                        *value = candidate;
                        return;
                    }
                    collected.extend(attempt);
                }
                errors.extend(collected);
            }
            SchemaKind::Ref(reference) => {
                if self.options.allow_deferred && value.is_string() {
                    return;
                }
                self.check(&reference.target, value, provenance, path, origin, errors);
            }
        }
    }

    /// Try alternatives in order, keeping the first one's coercions.
    fn first_match(
        &self,
        alternatives: &[Schema],
        value: &mut Value,
        provenance: Option<&Provenance>,
        path: &ConfigPath,
        origin: Option<&str>,
    ) -> bool {
        for alternative in alternatives {
            let mut candidate = value.clone();
            let attempt = self.attempt(alternative, &mut candidate, provenance, path, origin);
            if attempt.is_empty() {
                *value = candidate;
                return true;
            }
        }
        false
    }
}

fn coerce_string(value: &Value, coerce: bool) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(number) if coerce => Some(Value::String(number.to_string())),
        Value::Bool(flag) if coerce => Some(Value::String(flag.to_string())),
        _ => None,
    }
}

fn coerce_integer(value: &Value, coerce: bool) -> Option<Value> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Some(value.clone()),
        Value::String(raw) if coerce => raw.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn coerce_float(value: &Value, coerce: bool) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(raw) if coerce => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn coerce_boolean(value: &Value, coerce: bool) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(raw) if coerce => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}
