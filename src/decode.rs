use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::OpsDeckError;

/// Parses a response body. Empty bodies (204, json-server DELETE) become `null`.
pub(crate) fn decode_body(body: &str) -> Result<Value, OpsDeckError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
        .map_err(|err| OpsDeckError::Decode(format!("invalid response JSON: {err}; body: {body}")))
}

pub(crate) fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, OpsDeckError> {
    serde_json::from_value(value)
        .map_err(|err| OpsDeckError::Decode(format!("unexpected response shape: {err}")))
}

/// Reads a string id from a JSON object, accepting numeric ids as json-server emits them.
pub(crate) fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{decode_body, decode_value, id_of};
    use crate::OpsDeckError;

    #[test]
    fn empty_body_is_null() {
        assert_eq!(decode_body("").unwrap(), Value::Null);
        assert_eq!(decode_body("  \n").unwrap(), Value::Null);
        assert_eq!(decode_body("{}").unwrap(), json!({}));
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = decode_body("<html>").unwrap_err();
        assert!(matches!(err, OpsDeckError::Decode(msg) if msg.contains("<html>")));
    }

    #[test]
    fn decode_value_reports_shape_errors() {
        let err = decode_value::<Vec<u32>>(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, OpsDeckError::Decode(_)));
        assert_eq!(decode_value::<Vec<u32>>(json!([1, 2])).unwrap(), vec![1, 2]);
    }

    #[test]
    fn id_accepts_strings_and_numbers() {
        assert_eq!(id_of(&json!({"id": "alert-001"})), Some("alert-001".to_owned()));
        assert_eq!(id_of(&json!({"id": 42})), Some("42".to_owned()));
        assert_eq!(id_of(&json!({"name": "x"})), None);
    }
}
