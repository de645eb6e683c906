//! Built-in JSON schema validation (draft-07).
//!
//! Covers the draft-07 validation vocabulary, `$ref` by schema id or local
//! `#/` pointer, and the ajv-formats `format` names. Keywords outside the
//! vocabulary and unknown format names are ignored. Validation stops at the
//! first error.

use dashmap::DashMap;
use regex::Regex;
use serde_json::{Map, Value};

use relaybus_core::error::{BusError, Result};

use super::formats::{check_format, FormatCheck};

const MAX_REF_DEPTH: usize = 32;

/// Why a value could not be validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// The value does not conform; carries the first error message.
    Invalid(String),
    /// The schema is missing or cannot be evaluated.
    Schema(String),
}

/// Validation engine used by the schema gateway.
pub trait SchemaValidator: Send + Sync {
    /// Register a schema under its `$id`.
    fn add_schema(&self, schema: Value) -> Result<()>;

    fn get_schema(&self, id: &str) -> Option<Value>;

    fn remove_schema(&self, id: &str);

    fn validate(&self, id: &str, value: &Value) -> std::result::Result<(), ValidationFailure>;
}

#[derive(Debug, Default)]
pub struct JsonSchemaValidator {
    schemas: DashMap<String, Value>,
    /// Compiled `pattern`/`patternProperties` expressions.
    patterns: DashMap<String, Regex>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn pattern(&self, source: &str) -> std::result::Result<Regex, ValidationFailure> {
        if let Some(re) = self.patterns.get(source) {
            return Ok(re.value().clone());
        }
        let re = Regex::new(source)
            .map_err(|e| ValidationFailure::Schema(format!("pattern {source:?} does not compile: {e}")))?;
        self.patterns.insert(source.to_string(), re.clone());
        Ok(re)
    }
}

impl SchemaValidator for JsonSchemaValidator {
    fn add_schema(&self, schema: Value) -> Result<()> {
        if !schema.is_object() {
            return Err(BusError::Schema("schema must be a JSON object".into()));
        }
        let id = schema
            .get("$id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BusError::Schema("schema is missing $id".into()))?
            .to_string();
        self.schemas.insert(id, schema);
        Ok(())
    }

    fn get_schema(&self, id: &str) -> Option<Value> {
        self.schemas.get(id).map(|s| s.value().clone())
    }

    fn remove_schema(&self, id: &str) {
        self.schemas.remove(id);
    }

    fn validate(&self, id: &str, value: &Value) -> std::result::Result<(), ValidationFailure> {
        let root = self
            .get_schema(id)
            .ok_or_else(|| ValidationFailure::Schema(format!("no schema with key or ref \"{id}\"")))?;
        let scope = Scope {
            store: self,
            root: &root,
            depth: 0,
        };
        scope.check(&root, value, "data")
    }
}

struct Scope<'a> {
    store: &'a JsonSchemaValidator,
    root: &'a Value,
    depth: usize,
}

type Check = std::result::Result<(), ValidationFailure>;

fn invalid(path: &str, message: impl std::fmt::Display) -> Check {
    Err(ValidationFailure::Invalid(format!("{path} {message}")))
}

fn malformed(message: impl Into<String>) -> Check {
    Err(ValidationFailure::Schema(message.into()))
}

impl Scope<'_> {
    fn check(&self, schema: &Value, value: &Value, path: &str) -> Check {
        let schema = match schema {
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => return invalid(path, "must not be present"),
            Value::Object(schema) => schema,
            _ => return malformed(format!("schema at {path} must be an object or boolean")),
        };

        if let Some(reference) = schema.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| ValidationFailure::Schema("$ref must be a string".into()))?;
            return self.check_ref(reference, value, path);
        }

        if let Some(expected) = schema.get("type") {
            check_type(expected, value, path)?;
        }
        if let Some(allowed) = schema.get("enum") {
            let allowed = allowed
                .as_array()
                .ok_or_else(|| ValidationFailure::Schema("enum must be an array".into()))?;
            if !allowed.iter().any(|a| json_eq(a, value)) {
                return invalid(path, "must be equal to one of the allowed values");
            }
        }
        if let Some(constant) = schema.get("const") {
            if !json_eq(constant, value) {
                return invalid(path, "must be equal to constant");
            }
        }

        match value {
            Value::Object(obj) => self.check_object(schema, obj, path)?,
            Value::Array(items) => self.check_array(schema, items, path)?,
            Value::String(s) => self.check_string(schema, s, path)?,
            Value::Number(_) => check_number(schema, value, path)?,
            _ => {}
        }

        if let Some(format) = schema.get("format") {
            let format = format
                .as_str()
                .ok_or_else(|| ValidationFailure::Schema("format must be a string".into()))?;
            match check_format(format, value) {
                FormatCheck::Invalid => return invalid(path, format!("must match format \"{format}\"")),
                FormatCheck::Unknown => tracing::debug!(format, "unknown format ignored"),
                FormatCheck::Valid | FormatCheck::NotApplicable => {}
            }
        }

        self.check_combinators(schema, value, path)?;
        self.check_conditionals(schema, value, path)
    }

    /// `Ok(true)` when `value` passes `schema`; schema errors propagate.
    fn passes(&self, schema: &Value, value: &Value, path: &str) -> std::result::Result<bool, ValidationFailure> {
        match self.check(schema, value, path) {
            Ok(()) => Ok(true),
            Err(ValidationFailure::Invalid(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn check_conditionals(&self, schema: &Map<String, Value>, value: &Value, path: &str) -> Check {
        if let Some(not) = schema.get("not") {
            if self.passes(not, value, path)? {
                return invalid(path, "must NOT be valid");
            }
        }
        if let Some(condition) = schema.get("if") {
            let (branch, name) = if self.passes(condition, value, path)? {
                (schema.get("then"), "then")
            } else {
                (schema.get("else"), "else")
            };
            if let Some(branch) = branch {
                if !self.passes(branch, value, path)? {
                    return invalid(path, format!("must match \"{name}\" schema"));
                }
            }
        }
        Ok(())
    }

    fn check_string(&self, schema: &Map<String, Value>, s: &str, path: &str) -> Check {
        check_length(schema, s, path)?;
        if let Some(pattern) = schema.get("pattern") {
            let source = pattern
                .as_str()
                .ok_or_else(|| ValidationFailure::Schema("pattern must be a string".into()))?;
            if !self.store.pattern(source)?.is_match(s) {
                return invalid(path, format!("must match pattern \"{source}\""));
            }
        }
        Ok(())
    }

    fn check_ref(&self, reference: &str, value: &Value, path: &str) -> Check {
        if self.depth >= MAX_REF_DEPTH {
            return malformed(format!("$ref {reference} nests too deep"));
        }

        if let Some(pointer) = reference.strip_prefix('#') {
            let target = self
                .root
                .pointer(pointer)
                .ok_or_else(|| ValidationFailure::Schema(format!("can't resolve reference {reference}")))?;
            let nested = Scope {
                store: self.store,
                root: self.root,
                depth: self.depth + 1,
            };
            return nested.check(target, value, path);
        }

        let target = self
            .store
            .get_schema(reference)
            .ok_or_else(|| ValidationFailure::Schema(format!("can't resolve reference {reference}")))?;
        let nested = Scope {
            store: self.store,
            root: &target,
            depth: self.depth + 1,
        };
        nested.check(&target, value, path)
    }

    fn check_object(&self, schema: &Map<String, Value>, obj: &Map<String, Value>, path: &str) -> Check {
        let count = obj.len() as u64;
        if let Some(min) = schema.get("minProperties").and_then(Value::as_u64) {
            if count < min {
                return invalid(path, format!("must NOT have fewer than {min} properties"));
            }
        }
        if let Some(max) = schema.get("maxProperties").and_then(Value::as_u64) {
            if count > max {
                return invalid(path, format!("must NOT have more than {max} properties"));
            }
        }

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return invalid(path, format!("must have required property '{name}'"));
                }
            }
        }

        if let Some(dependencies) = schema.get("dependencies").and_then(Value::as_object) {
            for (name, dependency) in dependencies {
                if !obj.contains_key(name) {
                    continue;
                }
                match dependency {
                    Value::Array(needed) => {
                        let missing = needed.iter().filter_map(Value::as_str).find(|n| !obj.contains_key(*n));
                        if let Some(missing) = missing {
                            return invalid(
                                path,
                                format!("must have property {missing} when property {name} is present"),
                            );
                        }
                    }
                    sub_schema => self.check(sub_schema, &Value::Object(obj.clone()), path)?,
                }
            }
        }

        if let Some(names) = schema.get("propertyNames") {
            for name in obj.keys() {
                if !self.passes(names, &Value::String(name.clone()), path)? {
                    return invalid(path, format!("property name '{name}' is invalid"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, sub_schema) in properties {
                if let Some(v) = obj.get(name) {
                    self.check(sub_schema, v, &format!("{path}/{name}"))?;
                }
            }
        }

        let mut pattern_matched: Vec<&str> = Vec::new();
        if let Some(patterns) = schema.get("patternProperties").and_then(Value::as_object) {
            for (source, sub_schema) in patterns {
                let re = self.store.pattern(source)?;
                for (name, v) in obj.iter().filter(|(name, _)| re.is_match(name.as_str())) {
                    pattern_matched.push(name.as_str());
                    self.check(sub_schema, v, &format!("{path}/{name}"))?;
                }
            }
        }

        let is_additional = |name: &str| {
            !properties.is_some_and(|p| p.contains_key(name)) && !pattern_matched.contains(&name)
        };
        match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => {
                if let Some(extra) = obj.keys().find(|k| is_additional(k.as_str())) {
                    return invalid(path, format!("must NOT have additional properties: {extra}"));
                }
            }
            Some(additional @ Value::Object(_)) => {
                for (name, v) in obj.iter().filter(|(name, _)| is_additional(name.as_str())) {
                    self.check(additional, v, &format!("{path}/{name}"))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_array(&self, schema: &Map<String, Value>, items: &[Value], path: &str) -> Check {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return invalid(path, format!("must NOT have fewer than {min} items"));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if items.len() as u64 > max {
                return invalid(path, format!("must NOT have more than {max} items"));
            }
        }
        if schema.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
            for i in (0..items.len()).rev() {
                if let Some(j) = (0..i).rev().find(|j| json_eq(&items[*j], &items[i])) {
                    return invalid(
                        path,
                        format!("must NOT have duplicate items (items ## {j} and {i} are identical)"),
                    );
                }
            }
        }
        match schema.get("items") {
            Some(Value::Array(tuple)) => {
                for (i, (item_schema, item)) in tuple.iter().zip(items).enumerate() {
                    self.check(item_schema, item, &format!("{path}/{i}"))?;
                }
                match schema.get("additionalItems") {
                    Some(Value::Bool(false)) if items.len() > tuple.len() => {
                        return invalid(path, format!("must NOT have more than {} items", tuple.len()));
                    }
                    Some(additional @ Value::Object(_)) => {
                        for (i, item) in items.iter().enumerate().skip(tuple.len()) {
                            self.check(additional, item, &format!("{path}/{i}"))?;
                        }
                    }
                    _ => {}
                }
            }
            Some(item_schema) => {
                for (i, item) in items.iter().enumerate() {
                    self.check(item_schema, item, &format!("{path}/{i}"))?;
                }
            }
            None => {}
        }
        if let Some(contains) = schema.get("contains") {
            let mut found = false;
            for item in items {
                if self.passes(contains, item, path)? {
                    found = true;
                    break;
                }
            }
            if !found {
                return invalid(path, "must contain at least 1 valid item(s)");
            }
        }
        Ok(())
    }

    fn check_combinators(&self, schema: &Map<String, Value>, value: &Value, path: &str) -> Check {
        if let Some(all) = schema.get("allOf").and_then(Value::as_array) {
            for sub in all {
                self.check(sub, value, path)?;
            }
        }
        if let Some(any) = schema.get("anyOf").and_then(Value::as_array) {
            let mut matched = false;
            for sub in any {
                match self.check(sub, value, path) {
                    Ok(()) => {
                        matched = true;
                        break;
                    }
                    Err(ValidationFailure::Invalid(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            if !matched {
                return invalid(path, "must match a schema in anyOf");
            }
        }
        if let Some(one) = schema.get("oneOf").and_then(Value::as_array) {
            let mut passing = 0;
            for sub in one {
                match self.check(sub, value, path) {
                    Ok(()) => passing += 1,
                    Err(ValidationFailure::Invalid(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            if passing != 1 {
                return invalid(path, "must match exactly one schema in oneOf");
            }
        }
        Ok(())
    }
}

fn check_type(expected: &Value, value: &Value, path: &str) -> Check {
    let names: Vec<&str> = match expected {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => return malformed("type must be a string or an array of strings"),
    };
    if names.iter().any(|name| is_type(name, value)) {
        return Ok(());
    }
    invalid(path, format!("must be {}", names.join(",")))
}

fn is_type(name: &str, value: &Value) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.is_finite() && f.fract() == 0.0)
        }
        _ => false,
    }
}

fn check_length(schema: &Map<String, Value>, s: &str, path: &str) -> Check {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            return invalid(path, format!("must NOT have fewer than {min} characters"));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            return invalid(path, format!("must NOT have more than {max} characters"));
        }
    }
    Ok(())
}

fn check_number(schema: &Map<String, Value>, value: &Value, path: &str) -> Check {
    let Some(n) = value.as_f64() else { return Ok(()) };
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            return invalid(path, format!("must be >= {min}"));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            return invalid(path, format!("must be <= {max}"));
        }
    }
    if let Some(min) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
        if n <= min {
            return invalid(path, format!("must be > {min}"));
        }
    }
    if let Some(max) = schema.get("exclusiveMaximum").and_then(Value::as_f64) {
        if n >= max {
            return invalid(path, format!("must be < {max}"));
        }
    }
    if let Some(divisor) = schema.get("multipleOf").and_then(Value::as_f64) {
        if divisor <= 0.0 {
            return malformed("multipleOf must be greater than 0");
        }
        if (n / divisor).fract() != 0.0 {
            return invalid(path, format!("must be multiple of {divisor}"));
        }
    }
    Ok(())
}

/// JSON equality where `1` and `1.0` are the same number.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
        }
        _ => a == b,
    }
}
