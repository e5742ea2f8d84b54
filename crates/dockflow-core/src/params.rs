//! Module parameters: schema flattening, override merging and typed access.
//!
//! Module defaults are declared as a nested YAML schema where every leaf is a
//! mapping with a `default` key plus human-facing metadata:
//!
//! ```yaml
//! threshold:
//!   default: 4
//!   type: integer
//!   short: Minimum cluster size
//! ```
//!
//! [`flatten_schema`] collapses that schema into a plain name -> value map.

use crate::error::{ModuleError, Result};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Flat, ordered mapping from parameter name to value.
pub type Params = serde_json::Map<String, Value>;

/// Metadata entries that may appear as plain strings inside a group and are
/// not parameters.
pub const METADATA_KEYS: &[&str] = &["explevel", "short", "long", "type", "group", "title"];

/// Collapse a declarative schema into its default values.
///
/// * a mapping with a `default` key is a leaf; its default is taken verbatim;
/// * a mapping without one is a group; its leaves are merged into the same
///   flat map (group names are not kept);
/// * plain strings under a metadata name are skipped;
/// * any other plain value is kept as is, so a flat map flattens to itself.
///
/// When two groups declare the same leaf name the later one wins.
pub fn flatten_schema(schema: &Params) -> Params {
    let mut flat = Params::new();
    flatten_into(schema, None, &mut flat);
    flat
}

fn flatten_into(schema: &Params, group: Option<&str>, flat: &mut Params) {
    for (name, value) in schema {
        match value {
            Value::Object(entry) if entry.contains_key("default") => {
                insert_leaf(flat, name, entry["default"].clone(), group);
            }
            Value::Object(entry) => flatten_into(entry, Some(name), flat),
            Value::String(_) if METADATA_KEYS.contains(&name.as_str()) => continue,
            other => insert_leaf(flat, name, other.clone(), group),
        }
    }
}

fn insert_leaf(flat: &mut Params, name: &str, value: Value, group: Option<&str>) {
    if flat.contains_key(name) {
        warn!(
            parameter = %name,
            group = group.unwrap_or("<top>"),
            "parameter declared more than once, the later declaration wins"
        );
    }
    flat.insert(name.to_string(), value);
}

/// Recursively merge `overrides` into `base`.
///
/// Keys absent from `overrides` keep their value, scalar conflicts are won by
/// `overrides` and objects present on both sides are merged key by key.
pub fn deep_merge(base: &Params, overrides: &Params) -> Params {
    let mut merged = base.clone();
    for (key, value) in overrides {
        match (merged.get_mut(key), value) {
            (Some(Value::Object(current)), Value::Object(incoming)) => {
                *current = deep_merge(current, incoming);
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Interpret an arbitrary JSON value as a parameter mapping.
pub fn params_from_value(value: Value) -> Result<Params> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(ModuleError::Config(format!(
            "parameters must be a mapping, got {}",
            value_kind(&other)
        ))),
    }
}

/// Read a YAML schema file without flattening it.
pub fn read_schema(path: &Path) -> Result<Params> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ModuleError::ConfigNotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    parse_schema(&text, &path.display().to_string())
}

/// Parse a YAML schema held in memory. `origin` names it in errors.
pub fn parse_schema(text: &str, origin: &str) -> Result<Params> {
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| ModuleError::Config(format!("{}: {}", origin, e)))?;
    params_from_value(value)
}

/// Read a YAML schema file and flatten it to default values.
pub fn read_config(path: &Path) -> Result<Params> {
    Ok(flatten_schema(&read_schema(path)?))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Typed accessors over [`Params`].
pub trait ParamsExt {
    fn require(&self, name: &str) -> Result<&Value>;
    fn f64_param(&self, name: &str) -> Result<f64>;
    fn usize_param(&self, name: &str) -> Result<usize>;
    fn str_param(&self, name: &str) -> Result<&str>;
    fn bool_param(&self, name: &str) -> Result<bool>;
    /// `None` when the parameter is absent or null.
    fn opt_i64_param(&self, name: &str) -> Result<Option<i64>>;
    /// `None` when the parameter is absent or null.
    fn opt_str_param(&self, name: &str) -> Result<Option<&str>>;
    fn set_default(&mut self, name: &str, value: Value);
}

fn invalid(name: &str, expected: &str, got: &Value) -> ModuleError {
    ModuleError::InvalidParameter {
        name: name.to_string(),
        reason: format!("expected {}, got {}", expected, value_kind(got)),
    }
}

impl ParamsExt for Params {
    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| ModuleError::InvalidParameter {
            name: name.to_string(),
            reason: "missing".to_string(),
        })
    }

    fn f64_param(&self, name: &str) -> Result<f64> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| invalid(name, "a number", value))
    }

    fn usize_param(&self, name: &str) -> Result<usize> {
        let value = self.require(name)?;
        value
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| invalid(name, "a non-negative integer", value))
    }

    fn str_param(&self, name: &str) -> Result<&str> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| invalid(name, "a string", value))
    }

    fn bool_param(&self, name: &str) -> Result<bool> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| invalid(name, "a boolean", value))
    }

    fn opt_i64_param(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(name, "an integer", value)),
        }
    }

    fn opt_str_param(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| invalid(name, "a string", value)),
        }
    }

    fn set_default(&mut self, name: &str, value: Value) {
        self.entry(name.to_string()).or_insert(value);
    }
}
