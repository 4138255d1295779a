use futures::future::BoxFuture;
use polyllm_provider::{Message, ToolCall, ToolDef, ToolOutput};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context handed to a tool handler alongside its input.
#[derive(Clone)]
pub struct ToolCallContext {
    /// The conversation as of this call, including prior tool results.
    pub messages: Vec<Message>,
    /// The id of the call being executed.
    pub call_id: String,
    /// The caller's deadline. Handlers that ignore it delay loop
    /// termination by their own remaining work.
    pub abort: CancellationToken,
}

type Handler =
    Arc<dyn Fn(Value, ToolCallContext) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// A tool the model may call: a declaration plus an async handler.
#[derive(Clone)]
pub struct Tool {
    def: ToolDef,
    handler: Handler,
}

impl Tool {
    pub fn def(&self) -> &ToolDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Define a tool from a declaration and an async handler.
///
/// The handler receives the parsed JSON input (malformed model output is
/// substituted with `{}`) and the call context; a `Err(String)` becomes a
/// `ToolOutput::Error` fed back to the model.
pub fn tool<F, Fut>(
    name: impl Into<String>,
    description: impl Into<String>,
    input_schema: Value,
    handler: F,
) -> Tool
where
    F: Fn(Value, ToolCallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Tool {
        def: ToolDef::new(name, description, input_schema),
        handler: Arc::new(move |input, context| Box::pin(handler(input, context))),
    }
}

/// An insertion-ordered collection of tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Tool>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Tool) -> Self {
        self.insert(tool);
        self
    }

    /// Add a tool, replacing any previous tool with the same name.
    pub fn insert(&mut self, tool: Tool) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Declarations to advertise on the wire, in insertion order.
    pub fn defs(&self) -> Vec<ToolDef> {
        self.tools.iter().map(|t| t.def.clone()).collect()
    }

    /// Execute one call. An unknown tool name yields an error-typed
    /// output rather than failing the loop.
    pub async fn execute(
        &self,
        call: &ToolCall,
        messages: &[Message],
        abort: CancellationToken,
    ) -> ToolOutput {
        let Some(tool) = self.get(&call.name) else {
            return ToolOutput::error(&call.id, &call.name, format!("tool not found: {}", call.name));
        };
        let context = ToolCallContext {
            messages: messages.to_vec(),
            call_id: call.id.clone(),
            abort,
        };
        match (tool.handler)(call.input_json(), context).await {
            Ok(result) => ToolOutput::result(&call.id, &call.name, result),
            Err(error) => ToolOutput::error(&call.id, &call.name, error),
        }
    }
}
