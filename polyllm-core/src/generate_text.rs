use crate::step::Step;
use crate::stop_condition::StopCondition;
use crate::tool::ToolSet;
use polyllm_provider::{
    ChatModel, Collector, LlmError, Message, NoopCollector, ProviderOptions, Request,
    ResponseFormat, ToolChoice, Usage,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Hard upper bound on agent-loop iterations, regardless of the caller's
/// stop condition.
pub const MAX_LOOP_STEPS: usize = 12;

/// The outcome of a text generation.
#[derive(Debug, Clone)]
pub struct TextResult {
    /// The terminal step's assistant text.
    pub text: String,
    /// Every step, in order. Empty for a single-shot call that produced
    /// no tool calls.
    pub steps: Vec<Step>,
    /// Usage summed over every vendor call.
    pub usage: Usage,
    /// The last vendor response body.
    pub raw: Value,
}

/// Builder for text generation with optional multi-step tool execution.
///
/// With tools and a stop condition, the agent loop runs: model call, tool
/// dispatch, conversation append, stop evaluation, repeat. Without either
/// of them a single model call is made and any tool calls are surfaced
/// but not executed.
pub struct GenerateText {
    model: Arc<dyn ChatModel>,
    messages: Vec<Message>,
    model_id: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    tools: ToolSet,
    tool_choice: ToolChoice,
    response_format: Option<ResponseFormat>,
    stop_when: Option<Box<dyn StopCondition>>,
    provider_options: ProviderOptions,
    headers: Option<HashMap<String, String>>,
    abort: Option<CancellationToken>,
    collector: Arc<dyn Collector>,
}

impl GenerateText {
    pub fn new(model: Arc<dyn ChatModel>, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            model_id: None,
            temperature: None,
            max_tokens: None,
            tools: ToolSet::new(),
            tool_choice: ToolChoice::Auto,
            response_format: None,
            stop_when: None,
            provider_options: ProviderOptions::new(),
            headers: None,
            abort: None,
            collector: Arc::new(NoopCollector),
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

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn stop_when(mut self, condition: impl StopCondition + 'static) -> Self {
        self.stop_when = Some(Box::new(condition));
        self
    }

    pub fn stop_when_boxed(mut self, condition: Box<dyn StopCondition>) -> Self {
        self.stop_when = Some(condition);
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
        self.collector = collector;
        self
    }

    fn base_request(&self, messages: Vec<Message>, include_tools: bool) -> Request {
        let mut request = Request::new(messages);
        request.model = self.model_id.clone();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.response_format = self.response_format.clone();
        request.headers = self.headers.clone();
        request.provider_options = self.provider_options.clone();
        request.abort = self.abort.clone();
        if include_tools {
            request.tools = self.tools.defs();
            request.tool_choice = self.tool_choice.clone();
        }
        request
    }

    pub async fn execute(self) -> Result<TextResult, LlmError> {
        if self.messages.is_empty() {
            return Err(LlmError::invalid_request("messages must not be empty"));
        }
        if self.tools.is_empty() || self.stop_when.is_none() {
            self.execute_single_shot().await
        } else {
            self.execute_loop().await
        }
    }

    /// One model call. Tool calls, if any, are surfaced in a single step
    /// but not executed: the caller did not ask for iterative execution.
    async fn execute_single_shot(self) -> Result<TextResult, LlmError> {
        let request = self.base_request(self.messages.clone(), true);
        self.collector
            .on_request(self.model.provider_tag(), self.model.model_id());
        let response = self.model.generate(request).await.inspect_err(|error| {
            self.collector.on_error(self.model.provider_tag(), error);
        })?;
        self.collector.on_response(
            self.model.provider_tag(),
            self.model.model_id(),
            &response.usage,
        );

        let text = response.text();
        let tool_calls = response.tool_calls();
        let steps = if tool_calls.is_empty() {
            Vec::new()
        } else {
            vec![Step::new(0, text.clone(), tool_calls, Vec::new())]
        };
        Ok(TextResult {
            text,
            steps,
            usage: response.usage,
            raw: response.raw,
        })
    }

    /// The agent loop. Tools and tool choice go out on step 0 only;
    /// later steps omit them so the model settles on a textual answer
    /// after seeing tool results.
    async fn execute_loop(self) -> Result<TextResult, LlmError> {
        let stop_when = self
            .stop_when
            .as_ref()
            .expect("execute_loop requires a stop condition");
        let abort = self.abort.clone().unwrap_or_default();

        let mut conversation = self.messages.clone();
        let mut steps: Vec<Step> = Vec::new();
        let mut total_usage = Usage::default();
        let mut last_raw = Value::Null;

        for step_number in 0..MAX_LOOP_STEPS {
            let request = self.base_request(conversation.clone(), step_number == 0);

            self.collector
                .on_request(self.model.provider_tag(), self.model.model_id());
            // A hard request failure aborts the loop; completed steps are
            // discarded.
            let response = self.model.generate(request).await.inspect_err(|error| {
                self.collector.on_error(self.model.provider_tag(), error);
            })?;
            self.collector.on_response(
                self.model.provider_tag(),
                self.model.model_id(),
                &response.usage,
            );

            total_usage = total_usage.add(&response.usage);
            last_raw = response.raw.clone();

            let text = response.text();
            let tool_calls = response.tool_calls();

            // Empty text is fine when the model only produced tool calls.
            conversation.push(Message::assistant(text.clone()));

            let mut tool_results = Vec::new();
            for call in &tool_calls {
                self.collector.on_tool_call(&call.name, &call.id);
                let output = self
                    .tools
                    .execute(call, &conversation, abort.clone())
                    .await;
                self.collector
                    .on_tool_result(&call.name, &call.id, !output.is_error());
                conversation.push(Message::tool_result(&call.id, output.payload().to_string()));
                tool_results.push(output);
            }

            steps.push(Step::new(step_number, text, tool_calls, tool_results));
            let step = steps.last().expect("step was just pushed");

            if stop_when.is_met(step_number + 1, step) {
                break;
            }
            if step.tool_calls.is_empty() {
                break;
            }
            if step_number + 1 >= MAX_LOOP_STEPS {
                log::warn!(
                    "agent loop hit the safety cap of {MAX_LOOP_STEPS} steps before its stop condition"
                );
                break;
            }
        }

        let text = steps.last().map(|s| s.text.clone()).unwrap_or_default();
        Ok(TextResult {
            text,
            steps,
            usage: total_usage,
            raw: last_raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop_condition::no_more_tools;
    use crate::tool::tool;
    use async_trait::async_trait;
    use polyllm_provider::{
        Capabilities, ChatStream, ProviderResponse, ResponseContent, Role, ToolCall,
    };
    use serde_json::json;
    use std::sync::Mutex;

    /// Serves a scripted sequence of responses and records the requests.
    struct ScriptedModel {
        responses: Mutex<Vec<Result<ProviderResponse, LlmError>>>,
        requests: Mutex<Vec<Request>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<ProviderResponse, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn provider_tag(&self) -> &str {
            "scripted"
        }

        fn model_id(&self) -> &str {
            "scripted-1"
        }

        async fn capabilities(&self) -> Capabilities {
            Capabilities::text_only()
        }

        async fn generate(&self, request: Request) -> Result<ProviderResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }

        async fn stream(&self, _request: Request) -> Result<ChatStream, LlmError> {
            unimplemented!("not used in these tests")
        }
    }

    fn text_response(text: &str, input: u64, output: u64) -> ProviderResponse {
        ProviderResponse {
            content: vec![ResponseContent::Text(text.to_string())],
            usage: Usage::new(input, output),
            raw: json!({"scripted": true}),
        }
    }

    fn tool_call_response(text: &str, calls: Vec<ToolCall>) -> ProviderResponse {
        let mut content = vec![ResponseContent::Text(text.to_string())];
        content.extend(calls.into_iter().map(ResponseContent::ToolCall));
        ProviderResponse {
            content,
            usage: Usage::new(10, 5),
            raw: json!({"scripted": true}),
        }
    }

    fn calculator_tools() -> ToolSet {
        ToolSet::new().with(tool(
            "calculator",
            "Evaluate an addition",
            json!({"type": "object"}),
            |input, _context| async move {
                let expression = input
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut parts = expression.split('+');
                let a: i64 = parts.next().unwrap_or("0").trim().parse().unwrap_or(0);
                let b: i64 = parts.next().unwrap_or("0").trim().parse().unwrap_or(0);
                Ok(json!({"result": a + b}))
            },
        ))
    }

    #[tokio::test]
    async fn test_single_shot_without_tools() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(text_response(
            "Hello there",
            10,
            3,
        ))]));
        let result = GenerateText::new(model, vec![Message::user("Say hello in exactly 2 words.")])
            .max_tokens(50)
            .execute()
            .await
            .unwrap();

        assert_eq!(result.text, "Hello there");
        assert_eq!(result.usage.total_tokens, 13);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_single_shot_surfaces_but_does_not_execute_tool_calls() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(tool_call_response(
            "",
            vec![ToolCall::new("t1", "calculator", r#"{"expression":"1+1"}"#)],
        ))]));
        // Tools registered but no stop condition: loop elided.
        let result = GenerateText::new(model, vec![Message::user("compute")])
            .tools(calculator_tools())
            .execute()
            .await
            .unwrap();

        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].tool_calls.len(), 1);
        assert!(result.steps[0].tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_two_step_tool_loop() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_response(
                "I'll compute that.",
                vec![ToolCall::new(
                    "t1",
                    "calculator",
                    r#"{"expression":"15+27"}"#,
                )],
            )),
            Ok(text_response("15 + 27 equals 42.", 20, 8)),
        ]));
        let result = GenerateText::new(
            Arc::clone(&model) as Arc<dyn ChatModel>,
            vec![Message::user("What is 15+27? Use the calculator.")],
        )
        .tools(calculator_tools())
        .stop_when(no_more_tools())
        .execute()
        .await
        .unwrap();

        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].tool_calls[0].name, "calculator");
        assert_eq!(result.steps[0].tool_results[0].call_id(), "t1");
        assert_eq!(result.text, "15 + 27 equals 42.");
        // Usage sums both calls: (10+5) + (20+8).
        assert_eq!(result.usage.input_tokens, 30);
        assert_eq!(result.usage.output_tokens, 13);
        assert_eq!(result.usage.total_tokens, 43);

        // Tools are sent on step 0 only.
        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        assert!(requests[1].tools.is_empty());

        // The second request carries the assistant text and the tool
        // result appended to the conversation.
        let followup = &requests[1];
        assert_eq!(followup.messages.len(), 3);
        assert_eq!(followup.messages[1].role, Role::Assistant);
        assert_eq!(followup.messages[2].role, Role::Tool);
        assert_eq!(followup.messages[2].name.as_deref(), Some("t1"));
        assert!(followup.messages[2].text().contains("42"));
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result_and_continues() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_response(
                "",
                vec![ToolCall::new("t1", "missing_tool", "{}")],
            )),
            Ok(text_response("I could not use that tool.", 5, 5)),
        ]));
        let result = GenerateText::new(model, vec![Message::user("go")])
            .tools(calculator_tools())
            .stop_when(no_more_tools())
            .execute()
            .await
            .unwrap();

        assert_eq!(result.steps.len(), 2);
        match &result.steps[0].tool_results[0] {
            polyllm_provider::ToolOutput::Error { error, .. } => {
                assert_eq!(error, "tool not found: missing_tool");
            }
            other => panic!("expected error output, got {other:?}"),
        }
        assert_eq!(result.text, "I could not use that tool.");
    }

    #[tokio::test]
    async fn test_loop_aborts_on_model_error() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(tool_call_response(
                "",
                vec![ToolCall::new("t1", "calculator", r#"{"expression":"1+2"}"#)],
            )),
            Err(LlmError::new(
                polyllm_provider::ErrorKind::RateLimited,
                "slow down",
            )),
        ]));
        let result = GenerateText::new(model, vec![Message::user("go")])
            .tools(calculator_tools())
            .stop_when(no_more_tools())
            .execute()
            .await;

        // The error surfaces; completed steps are discarded with it.
        assert!(result.is_err());
        assert_eq!(
            result.unwrap_err().kind,
            polyllm_provider::ErrorKind::RateLimited
        );
    }

    #[tokio::test]
    async fn test_safety_cap_bounds_runaway_loop() {
        // The model asks for a tool on every step, forever.
        let responses: Vec<_> = (0..MAX_LOOP_STEPS + 5)
            .map(|i| {
                Ok(tool_call_response(
                    "",
                    vec![ToolCall::new(
                        format!("t{i}"),
                        "calculator",
                        r#"{"expression":"1+1"}"#,
                    )],
                ))
            })
            .collect();
        fn never_stop(_count: usize, _step: &Step) -> bool {
            false
        }

        let model = Arc::new(ScriptedModel::new(responses));
        let result = GenerateText::new(model, vec![Message::user("loop forever")])
            .tools(calculator_tools())
            .stop_when(never_stop)
            .execute()
            .await
            .unwrap();

        assert_eq!(result.steps.len(), MAX_LOOP_STEPS);
    }

    #[tokio::test]
    async fn test_max_steps_condition_bounds_loop() {
        let responses: Vec<_> = (0..5)
            .map(|i| {
                Ok(tool_call_response(
                    "",
                    vec![ToolCall::new(
                        format!("t{i}"),
                        "calculator",
                        r#"{"expression":"1+1"}"#,
                    )],
                ))
            })
            .collect();
        let model = Arc::new(ScriptedModel::new(responses));
        let result = GenerateText::new(model, vec![Message::user("go")])
            .tools(calculator_tools())
            .stop_when(crate::stop_condition::max_steps(2))
            .execute()
            .await
            .unwrap();

        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let result = GenerateText::new(model, vec![]).execute().await;
        assert_eq!(
            result.unwrap_err().kind,
            polyllm_provider::ErrorKind::InvalidRequest
        );
    }
}
