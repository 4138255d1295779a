use crate::generate_text::MAX_LOOP_STEPS;
use crate::step::Step;
use crate::stop_condition::StopCondition;
use crate::tool::ToolSet;
use polyllm_provider::{
    ChatModel, ChatStream, Collector, LlmError, Message, NoopCollector, ProviderOptions, Request,
    ResponseFormat, StreamEvent, ToolChoice, Usage,
};
use polyllm_provider_utils::spawn_event_stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builder for streaming text generation.
///
/// Without tools and a stop condition this is a thin wrapper over the
/// provider's stream. With both, a background worker drives the agent
/// loop: the caller's stream sees one `Start`, every step's text deltas
/// and tool calls as they arrive, a `ToolResult` per execution, and a
/// single terminal event carrying the aggregated usage.
pub struct StreamText {
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

impl StreamText {
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

    fn request(&self, messages: Vec<Message>, include_tools: bool, abort: CancellationToken) -> Request {
        let mut request = Request::new(messages).with_stream(true);
        request.model = self.model_id.clone();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.response_format = self.response_format.clone();
        request.headers = self.headers.clone();
        request.provider_options = self.provider_options.clone();
        request.abort = Some(abort);
        if include_tools {
            request.tools = self.tools.defs();
            request.tool_choice = self.tool_choice.clone();
        }
        request
    }

    /// Open the stream. The returned [`ChatStream`] must be closed by the
    /// caller; closing cancels any in-flight work.
    pub async fn start(self) -> Result<ChatStream, LlmError> {
        if self.messages.is_empty() {
            return Err(LlmError::invalid_request("messages must not be empty"));
        }
        if self.tools.is_empty() || self.stop_when.is_none() {
            let abort = self.abort.clone().unwrap_or_default();
            let request = self.request(self.messages.clone(), true, abort);
            return self.model.stream(request).await;
        }
        Ok(self.start_loop())
    }

    fn start_loop(mut self) -> ChatStream {
        let stop_when = self
            .stop_when
            .take()
            .expect("start_loop requires a stop condition");
        let user_abort = self.abort.take();

        spawn_event_stream(move |sender, cancel| async move {
            // Either the caller's abort or closing the stream stops the
            // worker.
            polyllm_provider_utils::link_abort(&cancel, user_abort);

            sender.emit(StreamEvent::Start);

            let mut conversation = self.messages.clone();
            let mut total_usage = Usage::default();

            for step_number in 0..MAX_LOOP_STEPS {
                let request =
                    self.request(conversation.clone(), step_number == 0, cancel.clone());
                self.collector
                    .on_request(self.model.provider_tag(), self.model.model_id());

                let mut inner = match self.model.stream(request).await {
                    Ok(stream) => stream,
                    Err(error) => {
                        self.collector.on_error(self.model.provider_tag(), &error);
                        sender.finish(StreamEvent::Error(error)).await;
                        return;
                    }
                };

                let mut text = String::new();
                let mut tool_calls = Vec::new();
                let mut step_usage = None;

                loop {
                    let event = tokio::select! {
                        _ = cancel.cancelled() => {
                            inner.close().await;
                            sender
                                .finish(StreamEvent::Error(LlmError::canceled()))
                                .await;
                            return;
                        }
                        event = inner.next_event() => event,
                    };
                    match event {
                        None => break,
                        Some(StreamEvent::Start) => {}
                        Some(StreamEvent::TextDelta { text: delta }) => {
                            text.push_str(&delta);
                            sender.emit(StreamEvent::text_delta(delta));
                        }
                        Some(StreamEvent::ToolCall(call)) => {
                            tool_calls.push(call.clone());
                            sender.emit(StreamEvent::ToolCall(call));
                        }
                        Some(StreamEvent::Raw(payload)) => {
                            sender.emit(StreamEvent::Raw(payload));
                        }
                        Some(StreamEvent::ToolResult(_)) => {}
                        Some(StreamEvent::Finish { usage }) => {
                            step_usage = usage;
                            break;
                        }
                        Some(StreamEvent::Error(error)) => {
                            inner.close().await;
                            self.collector.on_error(self.model.provider_tag(), &error);
                            sender.finish(StreamEvent::Error(error)).await;
                            return;
                        }
                    }
                }
                inner.close().await;

                if let Some(usage) = step_usage {
                    total_usage = total_usage.add(&usage);
                    self.collector.on_response(
                        self.model.provider_tag(),
                        self.model.model_id(),
                        &usage,
                    );
                }

                conversation.push(Message::assistant(text.clone()));

                let mut tool_results = Vec::new();
                for call in &tool_calls {
                    self.collector.on_tool_call(&call.name, &call.id);
                    let output = self
                        .tools
                        .execute(call, &conversation, cancel.clone())
                        .await;
                    self.collector
                        .on_tool_result(&call.name, &call.id, !output.is_error());
                    conversation
                        .push(Message::tool_result(&call.id, output.payload().to_string()));
                    sender.emit(StreamEvent::ToolResult(output.clone()));
                    tool_results.push(output);
                }

                let step = Step::new(step_number, text, tool_calls, tool_results);
                let done = stop_when.is_met(step_number + 1, &step) || step.is_final();
                if done {
                    break;
                }
            }

            sender
                .finish(StreamEvent::finish(Some(total_usage)))
                .await;
        })
    }
}
