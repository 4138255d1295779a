use base64::Engine;
use polyllm_provider::{
    ImageSource, LlmError, Message, Part, QuirkFlags, Request, Role, ToolChoice,
};
use serde_json::{Value, json};
use std::collections::HashSet;

/// The messages endpoint requires max_tokens; used when the caller did
/// not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Provider-option keys this dialect copies onto the request body.
const RECOGNIZED_OPTIONS: &[&str] = &["top_p", "top_k", "stop_sequences"];

/// Build the messages-endpoint request body from a neutral request.
///
/// System messages are hoisted out of the conversation into the
/// top-level `system` field; tool results travel as `tool_result` blocks
/// inside user-role messages.
pub fn build_request_body(
    request: &Request,
    model: &str,
    provider_tag: &str,
    flags: &QuirkFlags,
    strip_params: &HashSet<String>,
) -> Result<Value, LlmError> {
    let (system, messages) = hoist_system(&request.messages)?;

    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.wire_schema(),
                    })
                })
                .collect(),
        );
        if let Some(choice) = convert_tool_choice(&request.tool_choice, flags) {
            body["tool_choice"] = choice;
        }
        if flags.disable_parallel_tool_calls {
            body["tool_choice"]["disable_parallel_tool_use"] = json!(true);
        }
    }

    if request.stream {
        body["stream"] = json!(true);
    }

    if let Some(options) = request.options_for(provider_tag) {
        for (key, value) in options {
            if RECOGNIZED_OPTIONS.contains(&key.as_str()) {
                body[key] = value.clone();
            }
        }
    }

    if let Some(object) = body.as_object_mut() {
        object.retain(|key, _| !strip_params.contains(key));
    }

    Ok(body)
}

fn convert_tool_choice(choice: &ToolChoice, flags: &QuirkFlags) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!({ "type": "auto" })),
        ToolChoice::None => Some(json!({ "type": "none" })),
        ToolChoice::Required => Some(json!({ "type": "any" })),
        ToolChoice::Tool(name) => {
            if flags.disable_tool_choice {
                Some(json!({ "type": "auto" }))
            } else {
                Some(json!({ "type": "tool", "name": name }))
            }
        }
    }
}

/// Collect system-role messages in order, join them with a blank line,
/// and return the remaining conversation converted to vendor messages.
fn hoist_system(messages: &[Message]) -> Result<(Option<String>, Value), LlmError> {
    let mut system_parts = Vec::new();
    let mut converted = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system_parts.push(message.text()),
            Role::User => converted.push(json!({
                "role": "user",
                "content": convert_content(message)?,
            })),
            Role::Assistant => converted.push(json!({
                "role": "assistant",
                "content": convert_content(message)?,
            })),
            Role::Tool => {
                // Tool results ride inside a user-role message.
                let call_id = message.name.clone().ok_or_else(|| {
                    LlmError::invalid_request("tool message is missing its call id")
                })?;
                converted.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": message.text(),
                    }],
                }));
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    Ok((system, Value::Array(converted)))
}

/// A single text part collapses to a plain string; anything else becomes
/// a typed block array.
fn convert_content(message: &Message) -> Result<Value, LlmError> {
    if message.is_text_only() && message.parts.len() == 1 {
        return Ok(json!(message.text()));
    }
    let mut blocks = Vec::with_capacity(message.parts.len());
    for part in &message.parts {
        blocks.push(convert_part(part)?);
    }
    Ok(Value::Array(blocks))
}

fn convert_part(part: &Part) -> Result<Value, LlmError> {
    match part {
        Part::Text { text } => Ok(json!({ "type": "text", "text": text })),
        Part::Image {
            source, media_type, ..
        } => match source {
            // The messages endpoint takes base64 payloads only.
            ImageSource::Url(_) => Err(LlmError::invalid_request(
                "this endpoint requires base64 image payloads, not URLs",
            )),
            ImageSource::Bytes(bytes) => Ok(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            })),
        },
        Part::Audio { .. } | Part::Video { .. } | Part::File { .. } => Err(LlmError::unsupported(
            "the messages dialect carries only text and image parts",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyllm_provider::ToolDef;

    fn flags() -> QuirkFlags {
        QuirkFlags::default()
    }

    #[test]
    fn test_system_hoisting_joins_with_blank_line() {
        let request = Request::new(vec![
            Message::system("Be helpful."),
            Message::system("Be concise."),
            Message::user("Hi"),
        ]);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        assert_eq!(body["system"], json!("Be helpful.\n\nBe concise."));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], json!("user"));
        assert_eq!(body["messages"][0]["content"], json!("Hi"));
    }

    #[test]
    fn test_no_system_field_without_system_messages() {
        let request = Request::new(vec![Message::user("Hi")]);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_tool_result_becomes_user_block() {
        let request = Request::new(vec![
            Message::user("go"),
            Message::assistant("calling"),
            Message::tool_result("t1", "{\"result\":42}"),
        ]);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        let result_message = &body["messages"][2];
        assert_eq!(result_message["role"], json!("user"));
        assert_eq!(result_message["content"][0]["type"], json!("tool_result"));
        assert_eq!(result_message["content"][0]["tool_use_id"], json!("t1"));
    }

    #[test]
    fn test_url_images_rejected() {
        let request = Request::new(vec![Message::user_parts(vec![
            Part::text("what is this"),
            Part::image_url("https://example.com/cat.png", "image/png"),
        ])]);
        let err = build_request_body(
            &request,
            "claude-sonnet-4-5",
            "anthropic",
            &flags(),
            &HashSet::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind, polyllm_provider::ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_image_bytes_become_base64_block() {
        let request = Request::new(vec![Message::user_parts(vec![
            Part::text("look"),
            Part::image_bytes(vec![9, 8, 7], "image/jpeg"),
        ])]);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        let image = &body["messages"][0]["content"][1];
        assert_eq!(image["type"], json!("image"));
        assert_eq!(image["source"]["type"], json!("base64"));
        assert_eq!(image["source"]["media_type"], json!("image/jpeg"));
    }

    #[test]
    fn test_tools_and_choice_mapping() {
        let request = Request::new(vec![Message::user("go")])
            .with_tools(vec![ToolDef::new(
                "calculator",
                "adds",
                json!({"type": "object"}),
            )])
            .with_tool_choice(ToolChoice::Required);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        assert_eq!(body["tools"][0]["name"], json!("calculator"));
        assert!(body["tools"][0]["input_schema"].is_object());
        assert_eq!(body["tool_choice"]["type"], json!("any"));
    }

    #[test]
    fn test_max_tokens_default_applied() {
        let request = Request::new(vec![Message::user("hi")]);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        assert_eq!(body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn test_provider_options_copied() {
        let mut bag = std::collections::HashMap::new();
        bag.insert("top_k".to_string(), json!(40));
        bag.insert("num_gpu".to_string(), json!(2));
        let mut options = std::collections::HashMap::new();
        options.insert("anthropic".to_string(), bag);

        let request = Request::new(vec![Message::user("hi")]).with_provider_options(options);
        let body =
            build_request_body(&request, "claude-sonnet-4-5", "anthropic", &flags(), &HashSet::new())
                .unwrap();
        assert_eq!(body["top_k"], json!(40));
        assert!(body.get("num_gpu").is_none());
    }
}
