use polyllm_provider::{Capabilities, LlmError, Message, Part, ResponseFormat, Role};
use serde_json::Value;

/// Pick the structured-output strategy for the target endpoint and adjust
/// the conversation accordingly.
///
/// Native JSON-Schema support wins; JSON-mode-only endpoints get the
/// schema appended to the last user message; endpoints with neither run a
/// plain text generation with the same schema-in-prompt instruction.
pub(crate) fn prepare_structured(
    messages: &mut Vec<Message>,
    schema: &Value,
    capabilities: &Capabilities,
) -> Option<ResponseFormat> {
    if capabilities.supports_json_schema {
        return Some(ResponseFormat::JsonSchema {
            schema: schema.clone(),
            strict: true,
        });
    }
    append_schema_instruction(messages, schema);
    if capabilities.supports_json_mode {
        Some(ResponseFormat::JsonObject)
    } else {
        None
    }
}

fn append_schema_instruction(messages: &mut Vec<Message>, schema: &Value) {
    let instruction =
        format!("Respond with only a JSON object conforming to this schema: {schema}");
    if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User) {
        last_user.parts.push(Part::text(instruction));
    } else {
        messages.push(Message::user(instruction));
    }
}

/// Parse assistant text as a JSON value. No repair attempts.
pub(crate) fn parse_json_text(text: &str) -> Result<Value, LlmError> {
    serde_json::from_str(text)
        .map_err(|e| LlmError::internal(format!("structured output is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({"type": "object", "properties": {"name": {"type": "string"}}})
    }

    #[test]
    fn test_json_schema_capable_endpoint() {
        let mut caps = Capabilities::text_only();
        caps.supports_json_schema = true;
        let mut messages = vec![Message::user("describe a person")];

        let format = prepare_structured(&mut messages, &schema(), &caps);
        assert!(matches!(
            format,
            Some(ResponseFormat::JsonSchema { strict: true, .. })
        ));
        // The prompt is untouched: the schema rides in the response format.
        assert_eq!(messages[0].parts.len(), 1);
    }

    #[test]
    fn test_json_mode_only_appends_schema_to_last_user_message() {
        let mut caps = Capabilities::text_only();
        caps.supports_json_mode = true;
        let mut messages = vec![
            Message::user("first"),
            Message::assistant("ok"),
            Message::user("describe a person"),
        ];

        let format = prepare_structured(&mut messages, &schema(), &caps);
        assert!(matches!(format, Some(ResponseFormat::JsonObject)));
        assert_eq!(messages[2].parts.len(), 2);
        assert!(messages[2].text().contains("conforming to this schema"));
        assert_eq!(messages[0].parts.len(), 1);
    }

    #[test]
    fn test_no_native_support_prompts_only() {
        let caps = Capabilities::text_only();
        let mut messages = vec![Message::user("describe a person")];

        let format = prepare_structured(&mut messages, &schema(), &caps);
        assert!(format.is_none());
        assert!(messages[0].text().contains("conforming to this schema"));
    }

    #[test]
    fn test_parse_json_text() {
        assert_eq!(
            parse_json_text(r#"{"name":"Ada"}"#).unwrap(),
            json!({"name": "Ada"})
        );
        let err = parse_json_text("not json").unwrap_err();
        assert!(err.message.contains("not valid JSON"));
    }
}
