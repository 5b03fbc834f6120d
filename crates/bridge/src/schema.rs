// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Declarative response-shape schemas.
//!
//! A schema describes the accepted shape of an `accept` payload: `object`,
//! `array`, the primitives, `enum`, a required set, and optional bounds.
//! Parsing rejects unrecognised keywords; validation is total and
//! deterministic and rejects object fields the schema does not declare.

use std::collections::BTreeMap;

use serde_json::Value;

/// A parsed, validated schema.
#[derive(Debug, Clone)]
pub struct Schema {
    node: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Object {
        properties: BTreeMap<String, Node>,
        required: Vec<String>,
    },
    Array {
        items: Option<Box<Node>>,
        min_items: Option<u64>,
        max_items: Option<u64>,
    },
    String {
        min_length: Option<u64>,
        max_length: Option<u64>,
    },
    Number {
        minimum: Option<f64>,
        maximum: Option<f64>,
    },
    Integer {
        minimum: Option<i64>,
        maximum: Option<i64>,
    },
    Boolean,
    Null,
    Enum(Vec<Value>),
}

impl Schema {
    /// Parse a schema document. Unknown keywords are rejected.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        Ok(Self { node: parse_node(raw, "$")? })
    }

    /// Check `data` against this schema. Never panics, never allocates
    /// beyond the error message.
    pub fn validate(&self, data: &Value) -> Result<(), String> {
        validate_node(&self.node, data, "$")
    }
}

fn parse_node(raw: &Value, path: &str) -> Result<Node, String> {
    let Value::Object(map) = raw else {
        return Err(format!("{path}: schema must be an object"));
    };

    if let Some(variants) = map.get("enum") {
        check_keywords(map, &["enum", "type"], path)?;
        let Value::Array(values) = variants else {
            return Err(format!("{path}: enum must be an array"));
        };
        if values.is_empty() {
            return Err(format!("{path}: enum must be non-empty"));
        }
        return Ok(Node::Enum(values.clone()));
    }

    let Some(type_name) = map.get("type").and_then(Value::as_str) else {
        return Err(format!("{path}: missing type"));
    };

    match type_name {
        "object" => {
            check_keywords(map, &["type", "properties", "required"], path)?;
            let mut properties = BTreeMap::new();
            if let Some(props) = map.get("properties") {
                let Value::Object(props) = props else {
                    return Err(format!("{path}: properties must be an object"));
                };
                for (key, sub) in props {
                    let sub_path = format!("{path}.{key}");
                    properties.insert(key.clone(), parse_node(sub, &sub_path)?);
                }
            }
            let mut required = Vec::new();
            if let Some(req) = map.get("required") {
                let Value::Array(names) = req else {
                    return Err(format!("{path}: required must be an array"));
                };
                for name in names {
                    let Some(name) = name.as_str() else {
                        return Err(format!("{path}: required entries must be strings"));
                    };
                    if !properties.contains_key(name) {
                        return Err(format!("{path}: required field {name} not in properties"));
                    }
                    required.push(name.to_owned());
                }
            }
            Ok(Node::Object { properties, required })
        }
        "array" => {
            check_keywords(map, &["type", "items", "min_items", "max_items"], path)?;
            let items = match map.get("items") {
                Some(sub) => Some(Box::new(parse_node(sub, &format!("{path}[]"))?)),
                None => None,
            };
            Ok(Node::Array {
                items,
                min_items: bound_u64(map, "min_items", path)?,
                max_items: bound_u64(map, "max_items", path)?,
            })
        }
        "string" => {
            check_keywords(map, &["type", "min_length", "max_length"], path)?;
            Ok(Node::String {
                min_length: bound_u64(map, "min_length", path)?,
                max_length: bound_u64(map, "max_length", path)?,
            })
        }
        "number" => {
            check_keywords(map, &["type", "minimum", "maximum"], path)?;
            Ok(Node::Number {
                minimum: bound_f64(map, "minimum", path)?,
                maximum: bound_f64(map, "maximum", path)?,
            })
        }
        "integer" => {
            check_keywords(map, &["type", "minimum", "maximum"], path)?;
            Ok(Node::Integer {
                minimum: bound_i64(map, "minimum", path)?,
                maximum: bound_i64(map, "maximum", path)?,
            })
        }
        "boolean" => {
            check_keywords(map, &["type"], path)?;
            Ok(Node::Boolean)
        }
        "null" => {
            check_keywords(map, &["type"], path)?;
            Ok(Node::Null)
        }
        other => Err(format!("{path}: unknown type {other}")),
    }
}

fn check_keywords(
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
    path: &str,
) -> Result<(), String> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(format!("{path}: unknown schema keyword {key}"));
        }
    }
    Ok(())
}

fn bound_u64(
    map: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<u64>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            format!("{path}: {key} must be a non-negative integer")
        }),
    }
}

fn bound_i64(
    map: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<i64>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| format!("{path}: {key} must be an integer")),
    }
}

fn bound_f64(
    map: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<f64>, String> {
    match map.get(key) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| format!("{path}: {key} must be a number")),
    }
}

fn validate_node(node: &Node, data: &Value, path: &str) -> Result<(), String> {
    match node {
        Node::Object { properties, required } => {
            let Value::Object(map) = data else {
                return Err(format!("{path}: expected object"));
            };
            for key in map.keys() {
                if !properties.contains_key(key) {
                    return Err(format!("{path}: undeclared field {key}"));
                }
            }
            for name in required {
                if !map.contains_key(name) {
                    return Err(format!("{path}: missing required field {name}"));
                }
            }
            for (key, sub) in properties {
                if let Some(value) = map.get(key) {
                    validate_node(sub, value, &format!("{path}.{key}"))?;
                }
            }
            Ok(())
        }
        Node::Array { items, min_items, max_items } => {
            let Value::Array(values) = data else {
                return Err(format!("{path}: expected array"));
            };
            let len = values.len() as u64;
            if min_items.is_some_and(|min| len < min) {
                return Err(format!("{path}: fewer than {} items", min_items.unwrap_or(0)));
            }
            if max_items.is_some_and(|max| len > max) {
                return Err(format!("{path}: more than {} items", max_items.unwrap_or(0)));
            }
            if let Some(items) = items {
                for (i, value) in values.iter().enumerate() {
                    validate_node(items, value, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        Node::String { min_length, max_length } => {
            let Value::String(s) = data else {
                return Err(format!("{path}: expected string"));
            };
            let len = s.chars().count() as u64;
            if min_length.is_some_and(|min| len < min) {
                return Err(format!("{path}: shorter than {} chars", min_length.unwrap_or(0)));
            }
            if max_length.is_some_and(|max| len > max) {
                return Err(format!("{path}: longer than {} chars", max_length.unwrap_or(0)));
            }
            Ok(())
        }
        Node::Number { minimum, maximum } => {
            let Some(n) = data.as_f64() else {
                return Err(format!("{path}: expected number"));
            };
            if minimum.is_some_and(|min| n < min) || maximum.is_some_and(|max| n > max) {
                return Err(format!("{path}: number out of bounds"));
            }
            Ok(())
        }
        Node::Integer { minimum, maximum } => {
            let Some(n) = data.as_i64() else {
                return Err(format!("{path}: expected integer"));
            };
            if minimum.is_some_and(|min| n < min) || maximum.is_some_and(|max| n > max) {
                return Err(format!("{path}: integer out of bounds"));
            }
            Ok(())
        }
        Node::Boolean => {
            if data.is_boolean() {
                Ok(())
            } else {
                Err(format!("{path}: expected boolean"))
            }
        }
        Node::Null => {
            if data.is_null() {
                Ok(())
            } else {
                Err(format!("{path}: expected null"))
            }
        }
        Node::Enum(values) => {
            if values.contains(data) {
                Ok(())
            } else {
                Err(format!("{path}: not one of the enum values"))
            }
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
