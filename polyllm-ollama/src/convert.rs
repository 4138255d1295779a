use base64::Engine;
use polyllm_provider::{
    ImageSource, LlmError, Message, Part, Request, ResponseFormat, Role,
};
use serde_json::{Value, json};
use std::collections::HashSet;

/// Per-model option keys copied from the provider-options bag into the
/// nested `options` object.
const RECOGNIZED_OPTIONS: &[&str] = &[
    "top_p",
    "top_k",
    "seed",
    "repeat_penalty",
    "num_ctx",
    "num_gpu",
    "low_vram",
    "mirostat",
    "mirostat_eta",
    "mirostat_tau",
    "presence_penalty",
    "frequency_penalty",
];

/// Extra request knobs of the local endpoint.
#[derive(Debug, Clone, Default)]
pub struct LocalSettings {
    /// Server-side model residency, e.g. "5m" or "-1".
    pub keep_alive: Option<String>,
    /// Prompt template override (generate endpoint).
    pub template: Option<String>,
    /// Use `/api/generate` with a flattened prompt instead of the chat
    /// endpoint.
    pub use_generate_endpoint: bool,
}

/// Build the chat-endpoint request body.
pub fn build_chat_body(
    request: &Request,
    model: &str,
    provider_tag: &str,
    settings: &LocalSettings,
    strip_params: &HashSet<String>,
) -> Result<Value, LlmError> {
    let mut body = json!({
        "model": model,
        "messages": convert_messages(&request.messages)?,
        "stream": request.stream,
    });

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
        // The endpoint has no tool-choice selector; the request field is
        // dropped rather than sent.
    }

    apply_common_fields(&mut body, request, provider_tag, settings);

    if let Some(object) = body.as_object_mut() {
        object.retain(|key, _| !strip_params.contains(key));
    }
    Ok(body)
}

/// Build the generate-endpoint request body: the conversation flattens
/// into one prompt string.
pub fn build_generate_body(
    request: &Request,
    model: &str,
    provider_tag: &str,
    settings: &LocalSettings,
    strip_params: &HashSet<String>,
) -> Result<Value, LlmError> {
    let prompt = request
        .messages
        .iter()
        .map(Message::text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut body = json!({
        "model": model,
        "prompt": prompt,
        "stream": request.stream,
    });
    if let Some(template) = &settings.template {
        body["template"] = json!(template);
    }

    apply_common_fields(&mut body, request, provider_tag, settings);

    if let Some(object) = body.as_object_mut() {
        object.retain(|key, _| !strip_params.contains(key));
    }
    Ok(body)
}

fn apply_common_fields(
    body: &mut Value,
    request: &Request,
    provider_tag: &str,
    settings: &LocalSettings,
) {
    if matches!(
        request.response_format,
        Some(ResponseFormat::JsonObject) | Some(ResponseFormat::JsonSchema { .. })
    ) {
        body["format"] = json!("json");
    }
    if let Some(keep_alive) = &settings.keep_alive {
        body["keep_alive"] = json!(keep_alive);
    }

    // Sampling parameters live in the nested per-model options bag.
    let mut options = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }
    if let Some(bag) = request.options_for(provider_tag) {
        for (key, value) in bag {
            match key.as_str() {
                "stop_sequences" => {
                    options.insert("stop".to_string(), value.clone());
                }
                key if RECOGNIZED_OPTIONS.contains(&key) => {
                    options.insert(key.to_string(), value.clone());
                }
                _ => {}
            }
        }
    }
    if !options.is_empty() {
        body["options"] = Value::Object(options);
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
        Role::Tool => "tool",
    };

    let mut text_parts = Vec::new();
    let mut images = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text { text } => text_parts.push(text.as_str()),
            Part::Image { source, .. } => match source {
                // Images ride as base64 arrays on the message.
                ImageSource::Url(_) => {
                    return Err(LlmError::invalid_request(
                        "this endpoint requires base64 image payloads, not URLs",
                    ));
                }
                ImageSource::Bytes(bytes) => {
                    images.push(base64::engine::general_purpose::STANDARD.encode(bytes));
                }
            },
            Part::Audio { .. } | Part::Video { .. } | Part::File { .. } => {
                return Err(LlmError::unsupported(
                    "the local dialect carries only text and image parts",
                ));
            }
        }
    }

    let mut converted = json!({ "role": role, "content": text_parts.join("\n") });
    if !images.is_empty() {
        converted["images"] = json!(images);
    }
    Ok(converted)
}
