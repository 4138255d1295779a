use crate::QuirkFlags;
use base64::Engine;
use polyllm_provider::{
    ImageSource, LlmError, Message, Part, Request, ResponseFormat, Role, ToolChoice,
};
use serde_json::{Value, json};
use std::collections::HashSet;

/// Provider-option keys this dialect copies onto the request body.
const RECOGNIZED_OPTIONS: &[&str] = &[
    "top_p",
    "seed",
    "presence_penalty",
    "frequency_penalty",
    "stop_sequences",
];

/// Build the chat-completions request body from a neutral request.
///
/// The strip list is pruned last, after every other branch has run, so
/// it removes parameters regardless of where they came from.
pub fn build_request_body(
    request: &Request,
    model: &str,
    provider_tag: &str,
    flags: &QuirkFlags,
    strip_params: &HashSet<String>,
) -> Result<Value, LlmError> {
    let mut body = json!({
        "model": model,
        "messages": convert_messages(&request.messages)?,
    });

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if !request.tools.is_empty() {
        body["tools"] = Value::Array(
            request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.wire_schema(),
                        }
                    })
                })
                .collect(),
        );
        if let Some(choice) = convert_tool_choice(&request.tool_choice, flags) {
            body["tool_choice"] = choice;
        }
        if flags.disable_parallel_tool_calls {
            body["parallel_tool_calls"] = json!(false);
        }
    }

    if let Some(format) = &request.response_format {
        match format {
            ResponseFormat::Text => {}
            ResponseFormat::JsonObject => {
                body["response_format"] = json!({ "type": "json_object" });
            }
            ResponseFormat::JsonSchema { schema, strict } => {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "response",
                        "schema": schema,
                        "strict": *strict && !flags.disable_strict_json_schema,
                    }
                });
            }
        }
    }

    if request.stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }

    if let Some(options) = request.options_for(provider_tag) {
        for (key, value) in options {
            match key.as_str() {
                "stop_sequences" => {
                    body["stop"] = value.clone();
                }
                key if RECOGNIZED_OPTIONS.contains(&key) => {
                    body[key] = value.clone();
                }
                _ => {}
            }
        }
    }

    if let Some(object) = body.as_object_mut() {
        object.retain(|key, _| !strip_params.contains(key));
    }

    Ok(body)
}

/// `auto`/`none`/`required` map to the vendor literal; a specific tool
/// maps to the structured selector, or degrades to `auto` when the
/// endpoint rejects tool choice.
fn convert_tool_choice(choice: &ToolChoice, flags: &QuirkFlags) -> Option<Value> {
    match choice {
        ToolChoice::Auto => Some(json!("auto")),
        ToolChoice::None => Some(json!("none")),
        ToolChoice::Required => Some(json!("required")),
        ToolChoice::Tool(name) => {
            if flags.disable_tool_choice {
                Some(json!("auto"))
            } else {
                Some(json!({ "type": "function", "function": { "name": name } }))
            }
        }
    }
}

fn convert_messages(messages: &[Message]) -> Result<Value, LlmError> {
    let mut converted = Vec::with_capacity(messages.len());
    for message in messages {
        converted.push(convert_message(message)?);
    }
    Ok(Value::Array(converted))
}

fn convert_message(message: &Message) -> Result<Value, LlmError> {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => {
            // Tool results reference their call through tool_call_id.
            let call_id = message.name.clone().ok_or_else(|| {
                LlmError::invalid_request("tool message is missing its call id")
            })?;
            return Ok(json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": message.text(),
            }));
        }
    };

    // A single text part collapses to a plain string.
    if message.is_text_only() && message.parts.len() == 1 {
        return Ok(json!({ "role": role, "content": message.text() }));
    }

    let mut content = Vec::with_capacity(message.parts.len());
    for part in &message.parts {
        content.push(convert_part(part)?);
    }
    Ok(json!({ "role": role, "content": content }))
}

fn convert_part(part: &Part) -> Result<Value, LlmError> {
    match part {
        Part::Text { text } => Ok(json!({ "type": "text", "text": text })),
        Part::Image {
            source,
            media_type,
            detail,
        } => {
            let url = match source {
                ImageSource::Url(url) => url.clone(),
                ImageSource::Bytes(bytes) => format!(
                    "data:{media_type};base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                ),
            };
            let mut image_url = json!({ "url": url });
            if let Some(detail) = detail {
                image_url["detail"] = json!(detail);
            }
            Ok(json!({ "type": "image_url", "image_url": image_url }))
        }
        Part::Audio { .. } | Part::Video { .. } | Part::File { .. } => Err(LlmError::unsupported(
            "the chat-completions dialect carries only text and image parts",
        )),
    }
}
