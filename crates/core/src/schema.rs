//! JSON-Schema subset: matching, field filtering and merging
//!
//! Query schemas are compiled once into a [`SchemaNode`] tree so regexes are
//! built (and rejected) up front, then used both as the scan predicate and
//! as the field filter applied to every result.
//!
//! ## Supported keywords
//!
//! `type`, `const`, `enum`, `required`, `properties`, `additionalProperties`,
//! `pattern`, `contains`, `items`, `not`, `anyOf`, `allOf`, `minimum`,
//! `maximum`, `minLength`, `maxLength`. Unknown keywords (`title`,
//! `description`, `format`, `$$formula`, ...) are ignored.
//!
//! Two private extensions are carried through compilation untouched:
//! `$$links` (link name → sub-schema) and `$$sort` (in-memory comparator).
//!
//! ## Filter semantics
//!
//! [`CompiledSchema::filter`] returns `None` when the value does not match.
//! Otherwise object keys survive only when declared in `properties`, unless
//! `additionalProperties` is `true` (keep undeclared keys) or a schema
//! (filter undeclared keys through it). `additionalProperties: false` prunes
//! and never fails a match. An object with no declared subschema comes back
//! empty, and an array without `items` keeps only its scalars whole: nested
//! objects lose their keys. `allOf` merges the filtered output of every
//! branch; `anyOf` merges every matching branch.

use crate::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Private keyword: link name → sub-schema
pub const LINKS_KEYWORD: &str = "$$links";

/// Private keyword: in-memory comparison expression
pub const SORT_KEYWORD: &str = "$$sort";

/// JSON value type names accepted by `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    /// `null`
    Null,
    /// `boolean`
    Boolean,
    /// `object`
    Object,
    /// `array`
    Array,
    /// `number`
    Number,
    /// `integer` (a number with no fractional part)
    Integer,
    /// `string`
    String,
}

impl JsonType {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "null" => Ok(JsonType::Null),
            "boolean" => Ok(JsonType::Boolean),
            "object" => Ok(JsonType::Object),
            "array" => Ok(JsonType::Array),
            "number" => Ok(JsonType::Number),
            "integer" => Ok(JsonType::Integer),
            "string" => Ok(JsonType::String),
            other => Err(Error::invalid_schema(format!("unknown type '{}'", other))),
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Null, Value::Null) => true,
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Object, Value::Object(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::Number, Value::Number(_)) => true,
            (JsonType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0)
            }
            (JsonType::String, Value::String(_)) => true,
            _ => false,
        }
    }
}

/// Policy for object keys not listed in `properties`
#[derive(Debug, Clone)]
pub enum Additional {
    /// `additionalProperties: true`
    Allow,
    /// `additionalProperties: false`: undeclared keys are pruned
    Deny,
    /// `additionalProperties: { ... }`
    Schema(Box<SchemaNode>),
}

/// A compiled schema or sub-schema
#[derive(Debug, Clone)]
pub enum SchemaNode {
    /// `true` accepts everything, `false` nothing
    Bool(bool),
    /// A keyword object
    Object(Box<ObjectSchema>),
}

/// Keywords of an object schema
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    types: Option<Vec<JsonType>>,
    const_value: Option<Value>,
    enum_values: Option<Vec<Value>>,
    required: Vec<String>,
    properties: Vec<(String, SchemaNode)>,
    additional: Option<Additional>,
    pattern: Option<Regex>,
    contains: Option<SchemaNode>,
    items: Option<SchemaNode>,
    not: Option<SchemaNode>,
    any_of: Vec<SchemaNode>,
    all_of: Vec<SchemaNode>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
}

impl SchemaNode {
    /// Compile a schema value
    pub fn compile(schema: &Value) -> Result<Self> {
        match schema {
            Value::Bool(b) => Ok(SchemaNode::Bool(*b)),
            Value::Object(map) => Ok(SchemaNode::Object(Box::new(ObjectSchema::compile(map)?))),
            other => Err(Error::invalid_schema(format!(
                "schema must be an object or boolean, got {}",
                other
            ))),
        }
    }

    /// Whether `value` satisfies this schema
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaNode::Bool(b) => *b,
            SchemaNode::Object(schema) => schema.matches(value),
        }
    }

    /// Filter a value already known to match
    fn prune(&self, value: &Value) -> Value {
        match self {
            SchemaNode::Bool(_) => strip(value),
            SchemaNode::Object(schema) => schema.prune(value),
        }
    }
}

impl ObjectSchema {
    fn compile(map: &Map<String, Value>) -> Result<Self> {
        let mut schema = ObjectSchema::default();

        if let Some(types) = map.get("type") {
            schema.types = Some(match types {
                Value::String(name) => vec![JsonType::parse(name)?],
                Value::Array(names) => names
                    .iter()
                    .map(|n| {
                        n.as_str()
                            .ok_or_else(|| Error::invalid_schema("type entries must be strings"))
                            .and_then(JsonType::parse)
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => return Err(Error::invalid_schema("type must be a string or array")),
            });
        }

        schema.const_value = map.get("const").cloned();

        if let Some(values) = map.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| Error::invalid_schema("enum must be an array"))?;
            schema.enum_values = Some(values.clone());
        }

        if let Some(required) = map.get("required") {
            let required = required
                .as_array()
                .ok_or_else(|| Error::invalid_schema("required must be an array"))?;
            for key in required {
                let key = key
                    .as_str()
                    .ok_or_else(|| Error::invalid_schema("required entries must be strings"))?;
                schema.required.push(key.to_string());
            }
        }

        if let Some(properties) = map.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| Error::invalid_schema("properties must be an object"))?;
            for (key, sub) in properties {
                schema.properties.push((key.clone(), SchemaNode::compile(sub)?));
            }
        }

        schema.additional = match map.get("additionalProperties") {
            None => None,
            Some(Value::Bool(true)) => Some(Additional::Allow),
            Some(Value::Bool(false)) => Some(Additional::Deny),
            Some(sub @ Value::Object(_)) => {
                Some(Additional::Schema(Box::new(SchemaNode::compile(sub)?)))
            }
            Some(_) => {
                return Err(Error::invalid_schema(
                    "additionalProperties must be a boolean or schema",
                ))
            }
        };

        if let Some(pattern) = map.get("pattern") {
            let pattern = pattern
                .as_str()
                .ok_or_else(|| Error::invalid_schema("pattern must be a string"))?;
            let regex = Regex::new(pattern)
                .map_err(|e| Error::invalid_schema(format!("bad pattern '{}': {}", pattern, e)))?;
            schema.pattern = Some(regex);
        }

        schema.contains = map.get("contains").map(SchemaNode::compile).transpose()?;
        schema.items = map.get("items").map(SchemaNode::compile).transpose()?;
        schema.not = map.get("not").map(SchemaNode::compile).transpose()?;
        schema.any_of = compile_list(map, "anyOf")?;
        schema.all_of = compile_list(map, "allOf")?;
        schema.minimum = map.get("minimum").and_then(Value::as_f64);
        schema.maximum = map.get("maximum").and_then(Value::as_f64);
        schema.min_length = map.get("minLength").and_then(Value::as_u64).map(|n| n as usize);
        schema.max_length = map.get("maxLength").and_then(Value::as_u64).map(|n| n as usize);

        Ok(schema)
    }

    fn matches(&self, value: &Value) -> bool {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.accepts(value)) {
                return false;
            }
        }

        if let Some(expected) = &self.const_value {
            if !json_equal(expected, value) {
                return false;
            }
        }

        if let Some(values) = &self.enum_values {
            if !values.iter().any(|v| json_equal(v, value)) {
                return false;
            }
        }

        match value {
            Value::Object(map) => {
                if !self.required.iter().all(|key| map.contains_key(key)) {
                    return false;
                }
                for (key, sub) in &self.properties {
                    if let Some(v) = map.get(key) {
                        if !sub.matches(v) {
                            return false;
                        }
                    }
                }
                // `false` only prunes; undeclared keys never fail a match
                if let Some(Additional::Schema(sub)) = &self.additional {
                    for (k, v) in map {
                        if !self.is_declared(k) && !sub.matches(v) {
                            return false;
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(contains) = &self.contains {
                    if !items.iter().any(|item| contains.matches(item)) {
                        return false;
                    }
                }
                if let Some(item_schema) = &self.items {
                    if !items.iter().all(|item| item_schema.matches(item)) {
                        return false;
                    }
                }
            }
            Value::String(s) => {
                if let Some(pattern) = &self.pattern {
                    if !pattern.is_match(s) {
                        return false;
                    }
                }
                let length = s.chars().count();
                if self.min_length.map_or(false, |min| length < min) {
                    return false;
                }
                if self.max_length.map_or(false, |max| length > max) {
                    return false;
                }
            }
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    if self.minimum.map_or(false, |min| n < min) {
                        return false;
                    }
                    if self.maximum.map_or(false, |max| n > max) {
                        return false;
                    }
                }
            }
            _ => {}
        }

        if let Some(not) = &self.not {
            if not.matches(value) {
                return false;
            }
        }

        if !self.all_of.iter().all(|s| s.matches(value)) {
            return false;
        }

        if !self.any_of.is_empty() && !self.any_of.iter().any(|s| s.matches(value)) {
            return false;
        }

        true
    }

    fn is_declared(&self, key: &str) -> bool {
        self.properties.iter().any(|(k, _)| k == key)
    }

    fn prune(&self, value: &Value) -> Value {
        let mut result = match value {
            Value::Object(map) => {
                let mut kept = Map::new();
                for (key, sub) in &self.properties {
                    if let Some(v) = map.get(key) {
                        kept.insert(key.clone(), sub.prune(v));
                    }
                }
                for (key, v) in map {
                    if self.is_declared(key) {
                        continue;
                    }
                    match &self.additional {
                        Some(Additional::Allow) => {
                            kept.insert(key.clone(), v.clone());
                        }
                        Some(Additional::Schema(sub)) => {
                            kept.insert(key.clone(), sub.prune(v));
                        }
                        _ => {}
                    }
                }
                Value::Object(kept)
            }
            Value::Array(items) => match &self.items {
                Some(item_schema) => {
                    Value::Array(items.iter().map(|item| item_schema.prune(item)).collect())
                }
                None => strip(value),
            },
            _ => value.clone(),
        };

        for branch in &self.all_of {
            merge_values(&mut result, branch.prune(value));
        }
        for branch in &self.any_of {
            if branch.matches(value) {
                merge_values(&mut result, branch.prune(value));
            }
        }

        result
    }
}

/// Filter through a schema that declares no keys: scalars survive, objects
/// lose every key and arrays keep their shape
fn strip(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(Map::new()),
        Value::Array(items) => Value::Array(items.iter().map(strip).collect()),
        other => other.clone(),
    }
}

fn compile_list(map: &Map<String, Value>, keyword: &str) -> Result<Vec<SchemaNode>> {
    match map.get(keyword) {
        None => Ok(Vec::new()),
        Some(Value::Array(list)) => list.iter().map(SchemaNode::compile).collect(),
        Some(_) => Err(Error::invalid_schema(format!("{} must be an array", keyword))),
    }
}

/// Merge two filtered views of the same value
fn merge_values(target: &mut Value, other: Value) {
    match (target, other) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, value) in b {
                match a.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        a.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (existing, value) in a.iter_mut().zip(b) {
                merge_values(existing, value);
            }
        }
        (target, other) => {
            if !target.is_object() && !target.is_array() {
                *target = other;
            }
        }
    }
}

/// JSON equality that treats `1` and `1.0` as equal
pub fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

/// A compiled query schema
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    source: Value,
    root: SchemaNode,
    links: BTreeMap<String, Value>,
    sort: Option<String>,
}

impl CompiledSchema {
    /// Compile a query schema, validating every keyword up front
    pub fn compile(schema: &Value) -> Result<Self> {
        let root = SchemaNode::compile(schema)?;

        let mut links = BTreeMap::new();
        if let Some(declared) = schema.get(LINKS_KEYWORD) {
            let declared = declared
                .as_object()
                .ok_or_else(|| Error::invalid_schema("$$links must be an object"))?;
            for (name, sub) in declared {
                // Validate eagerly; the sub-schema is recompiled by the query
                // that traverses it.
                SchemaNode::compile(sub)?;
                links.insert(name.clone(), sub.clone());
            }
        }

        let sort = match schema.get(SORT_KEYWORD) {
            None => None,
            Some(Value::String(expression)) => Some(expression.clone()),
            Some(_) => return Err(Error::invalid_schema("$$sort must be a string")),
        };

        Ok(CompiledSchema {
            source: schema.clone(),
            root,
            links,
            sort,
        })
    }

    /// The schema as submitted
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Whether `value` satisfies the schema
    pub fn matches(&self, value: &Value) -> bool {
        self.root.matches(value)
    }

    /// Match and prune `value`; `None` when it does not match
    pub fn filter(&self, value: &Value) -> Option<Value> {
        if self.root.matches(value) {
            Some(self.root.prune(value))
        } else {
            None
        }
    }

    /// Declared `$$links`
    pub fn links(&self) -> &BTreeMap<String, Value> {
        &self.links
    }

    /// Declared `$$sort` expression
    pub fn sort_expression(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    /// `properties.<field>.const` when it is a string
    pub fn pinned(&self, field: &str) -> Option<&str> {
        self.source
            .get("properties")?
            .get(field)?
            .get("const")?
            .as_str()
    }
}

/// Combine two schemas so a value must satisfy both.
///
/// `properties` merge recursively and `required` lists are unioned; any other
/// keyword present on both sides with different values is kept from `a` and
/// `b` is appended to `allOf` so neither constraint is lost.
pub fn merge_schemas(a: &Value, b: &Value) -> Value {
    let (Some(a_map), Some(b_map)) = (a.as_object(), b.as_object()) else {
        return match (a, b) {
            (Value::Bool(true), other) | (other, Value::Bool(true)) => other.clone(),
            _ => serde_json::json!({ "allOf": [a, b] }),
        };
    };

    let mut merged = a_map.clone();
    let mut conflicts = Vec::new();

    for (key, b_value) in b_map {
        match (key.as_str(), merged.get_mut(key)) {
            (_, None) => {
                merged.insert(key.clone(), b_value.clone());
            }
            ("properties", Some(Value::Object(a_props))) if b_value.is_object() => {
                if let Some(b_props) = b_value.as_object() {
                    for (prop, b_sub) in b_props {
                        let combined = match a_props.get(prop) {
                            Some(a_sub) => merge_schemas(a_sub, b_sub),
                            None => b_sub.clone(),
                        };
                        a_props.insert(prop.clone(), combined);
                    }
                }
            }
            ("required", Some(Value::Array(a_required))) => {
                if let Some(b_required) = b_value.as_array() {
                    for entry in b_required {
                        if !a_required.contains(entry) {
                            a_required.push(entry.clone());
                        }
                    }
                }
            }
            (LINKS_KEYWORD, Some(Value::Object(a_links))) => {
                if let Some(b_links) = b_value.as_object() {
                    for (name, sub) in b_links {
                        a_links.entry(name.clone()).or_insert_with(|| sub.clone());
                    }
                }
            }
            (_, Some(a_value)) => {
                if a_value != b_value {
                    conflicts.push((key.clone(), b_value.clone()));
                }
            }
        }
    }

    if !conflicts.is_empty() {
        let extra: Map<String, Value> = conflicts.into_iter().collect();
        let all_of = merged
            .entry("allOf".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = all_of {
            list.push(Value::Object(extra));
        }
    }

    Value::Object(merged)
}
