//! `{{path}}` placeholder expansion over a build entry.

use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::warn;

use crate::plan::BuildEntry;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder regex"))
}

/// Expand every `{{key}}` / `{{key.subkey}}` placeholder in `template`.
///
/// Path components descend the entry record. `build_instructions` joins with
/// newlines, any other list joins with single spaces, missing keys expand to
/// the empty string.
pub fn expand(entry: &BuildEntry, template: &str) -> String {
    let value = serde_json::to_value(entry).expect("build entry serializes");
    placeholder_re()
        .replace_all(template, |caps: &Captures| {
            let path = caps[1].trim();
            resolve(&value, path).unwrap_or_else(|| {
                warn!("template placeholder '{{{{{path}}}}}' not found; expanding empty");
                String::new()
            })
        })
        .into_owned()
}

fn resolve(root: &serde_json::Value, path: &str) -> Option<String> {
    let mut cursor = root;
    for part in path.split('.') {
        cursor = cursor.get(part)?;
    }
    Some(render(cursor, path))
}

fn render(value: &serde_json::Value, path: &str) -> String {
    use serde_json::Value;
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| render(v, path)).collect();
            let sep = if path == "build_instructions" { "\n" } else { " " };
            parts.join(sep)
        }
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(_) => String::new(),
    }
}
