use crate::stop_condition::StopCondition;
use crate::stream_text::StreamText;
use crate::structured::{parse_json_text, prepare_structured};
use crate::tool::ToolSet;
use polyllm_provider::{
    ChatModel, Collector, LlmError, Message, ProviderOptions, StreamEvent, StreamHandle,
    ToolChoice,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builder for streaming structured-object generation.
///
/// Reuses the text stream: every `TextDelta` is forwarded for
/// progressive rendering while the stream accumulates the full text; on
/// `Finish` the buffer is parsed as JSON and exposed through
/// [`ObjectStream::final_value`].
pub struct StreamObject<T> {
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

impl<T: DeserializeOwned> StreamObject<T> {
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

    pub async fn start(self) -> Result<ObjectStream<T>, LlmError> {
        let capabilities = self.model.capabilities().await;
        let mut messages = self.messages;
        let response_format = prepare_structured(&mut messages, &self.schema, &capabilities);

        let mut builder = StreamText::new(self.model, messages)
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

        Ok(ObjectStream {
            inner: builder.start().await?,
            buffer: String::new(),
            outcome: None,
            _marker: PhantomData,
        })
    }
}

/// An open structured-object stream: forwards events for progressive
/// UIs while buffering text toward the final parse.
pub struct ObjectStream<T> {
    inner: polyllm_provider::ChatStream,
    buffer: String,
    outcome: Option<Result<Value, LlmError>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ObjectStream<T> {
    /// The next event, or `None` once the channel has closed. Text deltas
    /// are accumulated internally as they pass through.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.inner.next_event().await?;
        match &event {
            StreamEvent::TextDelta { text } => self.buffer.push_str(text),
            StreamEvent::Finish { .. } => {
                if self.outcome.is_none() {
                    self.outcome = Some(parse_json_text(&self.buffer));
                }
            }
            StreamEvent::Error(error) => {
                if self.outcome.is_none() {
                    self.outcome = Some(Err(error.clone()));
                }
            }
            _ => {}
        }
        Some(event)
    }

    /// Wait for the stream to finish and return the parsed value.
    ///
    /// Idempotent: the parse (or its failure) is memoized on the first
    /// terminal event, whether it was observed here or through
    /// [`Self::next_event`].
    pub async fn final_value(&mut self) -> Result<T, LlmError> {
        while self.outcome.is_none() {
            if self.next_event().await.is_none() {
                self.outcome = Some(Err(LlmError::internal(
                    "stream closed before a terminal event",
                )));
            }
        }
        match self.outcome.as_ref().expect("outcome was just set") {
            Ok(value) => serde_json::from_value(value.clone()).map_err(|e| {
                LlmError::internal(format!("structured output does not match target type: {e}"))
            }),
            Err(error) => Err(error.clone()),
        }
    }

    /// The close handle of the underlying stream.
    pub fn handle(&self) -> Arc<StreamHandle> {
        self.inner.handle()
    }

    /// Release the underlying stream. Idempotent.
    pub async fn close(&mut self) {
        self.inner.close().await;
    }
}
