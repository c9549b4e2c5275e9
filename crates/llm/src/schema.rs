//! Strict validation of structured output
//!
//! Provider-side constraints (Ollama `format`, OpenAI `json_schema`, Claude
//! tool input) are not guarantees: small models drift, outputs get cut at
//! the token limit. Every structured result is therefore re-checked here,
//! and failures carry the raw payload for the caller's salvage path.

use jsonschema::JSONSchema;
use scripture_qa_core::OutputSchema;
use serde_json::Value;

use crate::LlmError;

/// Parse `raw` as JSON and validate it against `schema`
pub fn parse_structured(raw: &str, schema: &OutputSchema) -> Result<Value, LlmError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| LlmError::SchemaValidation {
            raw: raw.to_string(),
            reason: format!("not valid JSON: {}", e),
        })?;

    validate_value(&value, schema).map_err(|reason| LlmError::SchemaValidation {
        raw: raw.to_string(),
        reason,
    })?;

    Ok(value)
}

/// Validate an already-parsed value; returns the joined validation messages on failure
pub fn validate_value(value: &Value, schema: &OutputSchema) -> Result<(), String> {
    let compiled = JSONSchema::compile(&schema.schema)
        .map_err(|e| format!("schema '{}' does not compile: {}", schema.name, e))?;

    let result = compiled.validate(value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn score_schema() -> OutputSchema {
        OutputSchema::new(
            "confidence",
            "Confidence evaluation",
            json!({
                "type": "object",
                "properties": {
                    "confidence_score": {"type": "integer", "minimum": 0, "maximum": 100},
                    "reasoning": {"type": "string"}
                },
                "required": ["confidence_score", "reasoning"],
                "additionalProperties": false
            }),
        )
    }

    #[test]
    fn test_valid_payload() {
        let value = parse_structured(r#"{"confidence_score": 88, "reasoning": "ok"}"#, &score_schema()).unwrap();
        assert_eq!(value["confidence_score"], 88);
    }

    #[test]
    fn test_missing_field_keeps_raw() {
        let raw = r#"{"confidence_score": 88}"#;
        match parse_structured(raw, &score_schema()) {
            Err(LlmError::SchemaValidation { raw: payload, reason }) => {
                assert_eq!(payload, raw);
                assert!(reason.contains("reasoning"));
            },
            other => panic!("expected schema validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload() {
        let raw = r#"{"confidence_score": 88, "reas"#;
        assert!(matches!(
            parse_structured(raw, &score_schema()),
            Err(LlmError::SchemaValidation { .. })
        ));
    }

    #[test]
    fn test_out_of_range() {
        let value = json!({"confidence_score": 140, "reasoning": "x"});
        assert!(validate_value(&value, &score_schema()).is_err());
    }
}
