//! Render a module's default schema as a commented user configuration.
//!
//! The output is meant to be pasted in a workflow file and edited by hand:
//!
//! ```text
//! [clustfcc]
//! threshold = 4  # $short Minimum cluster size / $group clustering
//! ```

use crate::params::Params;
use serde_json::Value;

/// Metadata keys that never become inline comments.
const SILENT_KEYS: &[&str] = &["default", "explevel", "short", "long", "type"];

/// Render `schema` under a `[module]` section header.
pub fn schema_to_cfg_text(schema: &Params, module: &str) -> String {
    let mut lines = vec![format!("[{}]", module)];
    lines.push(render_section(schema, module));
    lines.join("\n") + "\n"
}

fn render_section(schema: &Params, section: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for (name, param) in schema {
        let Value::Object(entry) = param else {
            // section-level tags such as `explevel: easy`
            continue;
        };

        match entry.get("default") {
            None => {
                let subsection = format!("{}.{}", section, name);
                lines.push(String::new());
                lines.push(format!("[{}]", subsection));
                lines.push(render_section(entry, &subsection));
            }
            Some(default) => {
                let comments: Vec<String> = entry
                    .iter()
                    .filter(|(tag, value)| {
                        !SILENT_KEYS.contains(&tag.as_str()) && is_truthy(value)
                    })
                    .map(|(tag, value)| format!("${} {}", tag, display_value(value)))
                    .collect();

                if comments.is_empty() {
                    lines.push(format!("{} = {}", name, py_repr(default)));
                } else {
                    lines.push(format!(
                        "{} = {}  # {}",
                        name,
                        py_repr(default),
                        comments.join(" / ")
                    ));
                }

                if entry.get("type").and_then(Value::as_str) == Some("list") {
                    lines.push(String::new());
                }
            }
        }
    }

    lines.join("\n")
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => py_repr(other),
    }
}

/// Python-style literal, the notation the configuration files use.
pub fn py_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(py_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("'{}': {}", k, py_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}
