//! Workflow output selection and answer shaping.
//!
//! Workflows name their result field however their author liked. The relay
//! looks for the first non-empty value among [`RESULT_FIELDS`], falls back to
//! the first field of `outputs`, normalizes it, and writes the rendered text
//! back under every conventional name in [`NORMALIZED_FIELDS`].
//!
//! The field list mirrors the workflows deployed upstream today. If their
//! output schema changes, this is where it breaks.

use serde_json::{Map, Value};

use super::AnswerResult;
use crate::normalize::normalize_value;

/// Result field names, highest priority first.
pub const RESULT_FIELDS: [&str; 5] = ["text", "result", "output", "mes_result", "answer"];

/// Fields that receive the normalized text.
pub const NORMALIZED_FIELDS: [&str; 3] = ["text", "result", "output"];

/// Whether a value counts as a usable result. `0` and `false` do not.
fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Pick the raw result out of a workflow `outputs` mapping.
pub fn select_result(outputs: &Map<String, Value>) -> Option<&Value> {
    RESULT_FIELDS
        .iter()
        .filter_map(|field| outputs.get(*field))
        .find(|value| has_content(value))
        .or_else(|| outputs.values().next())
        .filter(|value| has_content(value))
}

/// Normalize the selected result and write it back into `outputs`.
///
/// Returns the rendered text, or `None` when `outputs` holds nothing usable
/// (in which case the mapping is left untouched).
pub fn normalize_outputs(outputs: &mut Map<String, Value>) -> Option<String> {
    let rendered = normalize_value(select_result(outputs)?);
    for field in NORMALIZED_FIELDS {
        outputs.insert(field.to_string(), Value::String(rendered.clone()));
    }
    Some(rendered)
}

/// Apply [`normalize_outputs`] to the `data.outputs` of an event or run body.
pub fn normalize_payload_outputs(payload: &mut Value) -> Option<String> {
    payload
        .pointer_mut("/data/outputs")
        .and_then(Value::as_object_mut)
        .and_then(normalize_outputs)
}

fn text_field(body: &Value, field: &str) -> String {
    body.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

impl AnswerResult {
    /// Shape a blocking chat-app response.
    pub fn from_chat_response(body: &Value) -> Self {
        Self {
            answer: text_field(body, "answer"),
            conversation_id: text_field(body, "conversation_id"),
            message_id: text_field(body, "message_id"),
            created_at: body.get("created_at").and_then(Value::as_i64),
        }
    }

    /// Shape a blocking workflow run response.
    ///
    /// Workflows have no conversation; the run id stands in for the message id.
    pub fn from_workflow_response(mut body: Value) -> Self {
        let answer = normalize_payload_outputs(&mut body).unwrap_or_default();
        Self {
            answer,
            conversation_id: String::new(),
            message_id: text_field(&body, "workflow_run_id"),
            created_at: body.pointer("/data/created_at").and_then(Value::as_i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test fixture must be an object"),
        }
    }

    #[test]
    fn test_priority_order() {
        let map = outputs(json!({"answer": "a", "mes_result": "m", "result": "r"}));
        assert_eq!(select_result(&map), Some(&json!("r")));
    }

    #[test]
    fn test_empty_priority_fields_are_skipped() {
        let map = outputs(json!({"text": "", "answer": "a"}));
        assert_eq!(select_result(&map), Some(&json!("a")));
    }

    #[test]
    fn test_zero_and_false_fall_through() {
        let map = outputs(json!({"text": 0, "result": false, "output": "o"}));
        assert_eq!(select_result(&map), Some(&json!("o")));

        let map = outputs(json!({"text": 0, "answer": 7}));
        assert_eq!(select_result(&map), Some(&json!(7)));
    }

    #[test]
    fn test_first_key_fallback() {
        let map = outputs(json!({"zeta": "z", "alpha": "a"}));
        assert_eq!(select_result(&map), Some(&json!("z")));
    }

    #[test]
    fn test_nothing_usable() {
        assert_eq!(select_result(&Map::new()), None);
        let mut map = outputs(json!({"text": null}));
        assert_eq!(normalize_outputs(&mut map), None);
        assert_eq!(map, outputs(json!({"text": null})));
    }

    #[test]
    fn test_write_back_to_all_fields() {
        let mut map = outputs(json!({"mes_result": "a: 1, 2, 3, 4"}));
        let rendered = normalize_outputs(&mut map).unwrap();
        assert_eq!(rendered, "**a** (4项):\n- 1, 2, 3, 4");
        for field in NORMALIZED_FIELDS {
            assert_eq!(map[field], json!(rendered));
        }
        assert_eq!(map["mes_result"], json!("a: 1, 2, 3, 4"));
    }

    #[test]
    fn test_workflow_response_shaping() {
        let body = json!({
            "workflow_run_id": "run-1",
            "task_id": "task-1",
            "data": {
                "status": "succeeded",
                "outputs": {"mes_result": "count: 42"},
                "created_at": 1_705_395_332
            }
        });
        let answer = AnswerResult::from_workflow_response(body);
        assert_eq!(answer.answer, "**count**: 42");
        assert_eq!(answer.message_id, "run-1");
        assert_eq!(answer.conversation_id, "");
        assert_eq!(answer.created_at, Some(1_705_395_332));
    }

    #[test]
    fn test_chat_response_shaping() {
        let body = json!({
            "answer": "hello",
            "conversation_id": "c-1",
            "message_id": "m-1",
            "created_at": 1_705_395_332
        });
        let answer = AnswerResult::from_chat_response(&body);
        assert_eq!(answer.answer, "hello");
        assert_eq!(answer.conversation_id, "c-1");
        assert_eq!(answer.message_id, "m-1");
    }
}
