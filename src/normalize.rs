//! Rendering of workflow result payloads into display text.
//!
//! Workflow outputs arrive in many shapes: plain text, `key: value` lines,
//! fenced JSON blocks, JSON encoded inside JSON strings, arrays of records.
//! [`normalize`] turns any of them into a single string the chat UI can show
//! as plain text, a bullet list, or a Markdown table.
//!
//! Normalization is total. Whatever goes wrong along the way, the caller gets
//! the original input back.
//!
//! # Example
//!
//! ```rust
//! use dify_relay::normalize::normalize;
//!
//! assert_eq!(normalize(r#"{"mes_result": "count: 42"}"#), "**count**: 42");
//! assert_eq!(normalize("just text"), "just text");
//! ```

use std::fmt::Write as _;

use serde_json::{Map, Value};

/// Maximum number of JSON decode passes over nested string encodings.
const MAX_DECODE_ROUNDS: usize = 3;

/// Key whose value replaces the whole payload while unwrapping.
const RESULT_KEY: &str = "mes_result";

/// Key holding a list of pre-rendered lines.
const OUTPUT_KEY: &str = "output";

/// Lists and mappings up to this size stay inline.
const INLINE_LIMIT: usize = 3;

/// Items per bullet line when a long comma list is split up.
const ITEMS_PER_LINE: usize = 5;

const CODE_FENCES: [&str; 3] = ["```json", "```markdown", "```"];

const TABLE_HEADER: &str = "| 项目 | 值 |\n|------|------|\n";

/// Intermediate value while unwrapping nested encodings.
#[derive(Debug)]
enum Working {
    Text(String),
    Mapping(Map<String, Value>),
    Sequence(Vec<Value>),
}

impl Working {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Mapping(map),
            Value::Array(items) => Self::Sequence(items),
            Value::String(text) => Self::Text(text),
            scalar => Self::Text(scalar.to_string()),
        }
    }
}

/// Render a raw result payload as display text.
///
/// Never fails: on any structural surprise the input is returned unchanged.
pub fn normalize(raw: &str) -> String {
    match render(raw) {
        Some(rendered) => rendered,
        None => {
            tracing::warn!(
                input_length = raw.len(),
                "Result normalization failed, returning raw text"
            );
            raw.to_string()
        }
    }
}

/// Render a JSON value taken from a workflow `outputs` mapping.
///
/// Strings are normalized as-is; any other value is normalized from its JSON
/// text.
pub fn normalize_value(raw: &Value) -> String {
    normalize(&value_text(raw))
}

/// Text form of a value as it appears inside rendered output.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render(raw: &str) -> Option<String> {
    match unwrap_layers(raw.trim()) {
        Working::Text(text) => render_text(&text),
        Working::Mapping(map) => Some(render_mapping(&map)),
        Working::Sequence(items) => render_sequence(&items),
    }
}

/// Peel JSON string encodings and `mes_result` wrappers, at most
/// [`MAX_DECODE_ROUNDS`] times.
fn unwrap_layers(input: &str) -> Working {
    let mut content = input.to_string();

    for round in 1..=MAX_DECODE_ROUNDS {
        let Ok(parsed) = serde_json::from_str::<Value>(&content) else {
            tracing::trace!(round, "Payload is not JSON");
            break;
        };

        match parsed {
            Value::Object(mut map) if map.contains_key(RESULT_KEY) => {
                content = map
                    .remove(RESULT_KEY)
                    .map(|value| value_text(&value))
                    .unwrap_or_default();
                tracing::trace!(round, "Unwrapped result key");
            }
            Value::String(inner) => content = inner,
            structured => return Working::from_value(structured),
        }
    }

    Working::Text(content)
}

fn render_text(text: &str) -> Option<String> {
    let cleaned = clean_text(text);

    if let Some(lines) = key_value_candidates(&cleaned) {
        return Some(render_key_value_lines(&lines));
    }

    if !looks_like_json(&cleaned) {
        return Some(cleaned);
    }

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => match Working::from_value(value) {
            Working::Text(text) => Some(text),
            Working::Mapping(map) => Some(render_mapping(&map)),
            Working::Sequence(items) => render_sequence(&items),
        },
        Err(_) => Some(cleaned),
    }
}

/// Drop code fences, one layer of surrounding quotes, and escaped newlines.
fn clean_text(text: &str) -> String {
    let mut stripped = text.to_string();
    for fence in CODE_FENCES {
        stripped = stripped.replace(fence, "");
    }
    strip_quotes(stripped.trim()).replace("\\n", "\n")
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.starts_with(quote) && text.ends_with(quote) {
            return text.get(1..text.len() - 1).unwrap_or_default();
        }
    }
    text
}

fn looks_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

/// Lines to render as `key: value` pairs, if the text has that shape.
///
/// Multi-line text qualifies whenever any line has a colon, even if it looks
/// like JSON. A single line qualifies only when it does not look like JSON.
fn key_value_candidates(text: &str) -> Option<Vec<&str>> {
    let lines: Vec<&str> = text.split('\n').collect();
    if !lines.iter().any(|line| line.contains(':')) {
        return None;
    }
    if lines.len() == 1 && looks_like_json(text) {
        return None;
    }
    Some(lines)
}

fn render_key_value_lines(lines: &[&str]) -> String {
    let mut rendered = Vec::with_capacity(lines.len());

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            if !line.trim().is_empty() {
                rendered.push((*line).to_string());
            }
            continue;
        };

        let (key, value) = (key.trim(), value.trim());
        let items: Vec<&str> = value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect();

        if items.len() > INLINE_LIMIT {
            rendered.push(format!("**{key}** ({}项):", items.len()));
            for group in items.chunks(ITEMS_PER_LINE) {
                rendered.push(format!("- {}", group.join(", ")));
            }
        } else {
            rendered.push(format!("**{key}**: {value}"));
        }
    }

    rendered.join("\n")
}

/// Render an array: a two-column table for `key`/`value` records, a full
/// table for other records, bullets for scalars.
///
/// Returns `None` when the records are inconsistent with the first one.
fn render_sequence(items: &[Value]) -> Option<String> {
    match items.first() {
        Some(Value::Object(first)) if first.contains_key("key") && first.contains_key("value") => {
            let mut table = String::from(TABLE_HEADER);
            for item in items {
                let record = item.as_object()?;
                let key = record.get("key")?;
                let value = record.get("value")?;
                let _ = writeln!(table, "| {} | {} |", value_text(key), value_text(value));
            }
            Some(table.trim().to_string())
        }
        Some(Value::Object(first)) => {
            let columns: Vec<&str> = first.keys().map(String::as_str).collect();
            let mut table = format!("| {} |\n|{}\n", columns.join(" | "), "------|".repeat(columns.len()));
            for item in items {
                let record = item.as_object()?;
                let cells: Vec<String> = columns
                    .iter()
                    .map(|column| record.get(*column).map(value_text).unwrap_or_default())
                    .collect();
                let _ = writeln!(table, "| {} |", cells.join(" | "));
            }
            Some(table.trim().to_string())
        }
        _ => Some(
            items
                .iter()
                .map(|item| format!("- {}", value_text(item)))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }
}

fn render_mapping(map: &Map<String, Value>) -> String {
    if let Some(Value::Array(lines)) = map.get(OUTPUT_KEY) {
        return lines.iter().map(value_text).collect::<Vec<_>>().join("\n");
    }

    if map.len() > INLINE_LIMIT {
        let mut table = String::from(TABLE_HEADER);
        for (key, value) in map {
            let _ = writeln!(table, "| {key} | {} |", value_text(value));
        }
        return table.trim().to_string();
    }

    map.iter()
        .map(|(key, value)| format!("**{key}**: {}", value_text(value)))
        .collect::<Vec<_>>()
        .join("\n")
}
