use crate::generate_text::GenerateText;
use crate::step::Step;
use crate::stop_condition::StopCondition;
use crate::structured::{parse_json_text, prepare_structured};
use crate::tool::ToolSet;
use polyllm_provider::{
    ChatModel, Collector, LlmError, Message, ProviderOptions, ToolChoice, Usage,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The outcome of a structured-object generation.
#[derive(Debug, Clone)]
pub struct ObjectResult<T> {
    /// The parsed value.
    pub value: T,
    /// Steps, as in [`crate::TextResult`].
    pub steps: Vec<Step>,
    /// Usage summed over every vendor call.
    pub usage: Usage,
    /// The last vendor response body.
    pub raw: Value,
}

/// Builder for generating a JSON value conforming to a caller-supplied
/// schema, deserialized into `T`.
///
/// The strategy adapts to the endpoint: native JSON-Schema response
/// format where supported, JSON mode plus schema-in-prompt otherwise,
/// plain prompting as the last resort. Beyond parsing (and deserializing
/// into `T`), the value is not validated against the schema.
pub struct GenerateObject<T> {
    model: Arc<dyn ChatModel>,
    messages: Vec<Message>,
    schema: Value,
    model_id: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    tools: ToolSet,
    tool_choice: ToolChoice,
    stop_when: Option<Box<dyn StopCondition>>,
    provider_options: ProviderOptions,
    headers: Option<HashMap<String, String>>,
    abort: Option<CancellationToken>,
    collector: Option<Arc<dyn Collector>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> GenerateObject<T> {
    pub fn new(model: Arc<dyn ChatModel>, messages: Vec<Message>, schema: Value) -> Self {
        Self {
            model,
            messages,
            schema,
            model_id: None,
            temperature: None,
            max_tokens: None,
            tools: ToolSet::new(),
            tool_choice: ToolChoice::Auto,
            stop_when: None,
            provider_options: ProviderOptions::new(),
            headers: None,
            abort: None,
            collector: None,
            _marker: PhantomData,
        }
    }

    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn stop_when(mut self, condition: impl StopCondition + 'static) -> Self {
        self.stop_when = Some(Box::new(condition));
        self
    }

    pub fn provider_options(mut self, options: ProviderOptions) -> Self {
        self.provider_options = options;
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn abort(mut self, abort: CancellationToken) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub async fn execute(self) -> Result<ObjectResult<T>, LlmError> {
        let capabilities = self.model.capabilities().await;
        let mut messages = self.messages;
        let response_format = prepare_structured(&mut messages, &self.schema, &capabilities);

        let mut builder = GenerateText::new(self.model, messages)
            .tools(self.tools)
            .tool_choice(self.tool_choice)
            .provider_options(self.provider_options);
        if let Some(model_id) = self.model_id {
            builder = builder.model_id(model_id);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(format) = response_format {
            builder = builder.response_format(format);
        }
        if let Some(stop_when) = self.stop_when {
            builder = builder.stop_when_boxed(stop_when);
        }
        if let Some(headers) = self.headers {
            builder = builder.headers(headers);
        }
        if let Some(abort) = self.abort {
            builder = builder.abort(abort);
        }
        if let Some(collector) = self.collector {
            builder = builder.collector(collector);
        }

        let result = builder.execute().await?;
        let parsed = parse_json_text(&result.text)?;
        let value: T = serde_json::from_value(parsed).map_err(|e| {
            LlmError::internal(format!("structured output does not match target type: {e}"))
        })?;

        Ok(ObjectResult {
            value,
            steps: result.steps,
            usage: result.usage,
            raw: result.raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use polyllm_provider::{
        Capabilities, ChatStream, ProviderResponse, Request, ResponseContent, ResponseFormat,
    };
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        name: String,
        age: u32,
    }

    struct FixedModel {
        capabilities: Capabilities,
        reply: String,
        requests: Mutex<Vec<Request>>,
    }

    impl FixedModel {
        fn new(capabilities: Capabilities, reply: &str) -> Self {
            Self {
                capabilities,
                reply: reply.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for FixedModel {
        fn provider_tag(&self) -> &str {
            "fixed"
        }

        fn model_id(&self) -> &str {
            "fixed-1"
        }

        async fn capabilities(&self) -> Capabilities {
            self.capabilities.clone()
        }

        async fn generate(&self, request: Request) -> Result<ProviderResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            Ok(ProviderResponse {
                content: vec![ResponseContent::Text(self.reply.clone())],
                usage: Usage::new(10, 5),
                raw: json!({}),
            })
        }

        async fn stream(&self, _request: Request) -> Result<ChatStream, LlmError> {
            unimplemented!("not used in these tests")
        }
    }

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name", "age"]
        })
    }

    #[tokio::test]
    async fn test_json_schema_endpoint_sets_response_format() {
        let mut caps = Capabilities::text_only();
        caps.supports_json_schema = true;
        let model = Arc::new(FixedModel::new(caps, r#"{"name":"Ada","age":36}"#));

        let result: ObjectResult<Person> = GenerateObject::new(
            Arc::clone(&model) as Arc<dyn ChatModel>,
            vec![Message::user("describe Ada")],
            person_schema(),
        )
        .execute()
        .await
        .unwrap();

        assert_eq!(
            result.value,
            Person {
                name: "Ada".to_string(),
                age: 36
            }
        );
        let requests = model.requests.lock().unwrap();
        assert!(matches!(
            requests[0].response_format,
            Some(ResponseFormat::JsonSchema { strict: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_prompt_only_endpoint_injects_schema() {
        let model = Arc::new(FixedModel::new(
            Capabilities::text_only(),
            r#"{"name":"Ada","age":36}"#,
        ));

        let result: ObjectResult<Person> = GenerateObject::new(
            Arc::clone(&model) as Arc<dyn ChatModel>,
            vec![Message::user("describe Ada")],
            person_schema(),
        )
        .execute()
        .await
        .unwrap();

        assert_eq!(result.value.name, "Ada");
        let requests = model.requests.lock().unwrap();
        assert!(requests[0].response_format.is_none());
        assert!(requests[0].messages[0]
            .text()
            .contains("conforming to this schema"));
    }

    #[tokio::test]
    async fn test_invalid_json_reply_surfaces_error() {
        let mut caps = Capabilities::text_only();
        caps.supports_json_mode = true;
        let model = Arc::new(FixedModel::new(caps, "I would rather chat."));

        let result: Result<ObjectResult<Person>, _> = GenerateObject::new(
            model as Arc<dyn ChatModel>,
            vec![Message::user("describe Ada")],
            person_schema(),
        )
        .execute()
        .await;

        assert!(result.unwrap_err().message.contains("not valid JSON"));
    }
}
