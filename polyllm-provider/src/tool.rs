use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool declaration as advertised to the model.
///
/// `input_schema` is a JSON Schema object and is inlined into the vendor
/// tool definition unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// The schema to put on the wire: the declared schema when it is an
    /// object, otherwise the minimal `{"type": "object"}` substitute.
    pub fn wire_schema(&self) -> Value {
        if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            serde_json::json!({ "type": "object" })
        }
    }
}

/// How the model should select among the declared tools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    #[default]
    Auto,
    /// The model must not call a tool.
    None,
    /// The model must call some tool.
    Required,
    /// The model must call the named tool.
    Tool(String),
}

/// A tool invocation requested by the model.
///
/// `id` is assigned by the vendor and is the sole correlation key between
/// the call and its result; it is preserved verbatim. `input` is the raw
/// JSON argument text exactly as the model emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: input.into(),
        }
    }

    /// Parse the raw argument text, substituting `{}` when it is not
    /// valid JSON.
    pub fn input_json(&self) -> Value {
        serde_json::from_str(&self.input).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// The outcome of executing one tool call: a result or an error, never
/// both. Tool failures are data, not control flow — the loop reports them
/// back to the model instead of aborting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    Result {
        id: String,
        name: String,
        result: Value,
    },
    Error {
        id: String,
        name: String,
        error: String,
    },
}

impl ToolOutput {
    pub fn result(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        ToolOutput::Result {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    pub fn error(id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        ToolOutput::Error {
            id: id.into(),
            name: name.into(),
            error: error.into(),
        }
    }

    /// The id of the tool call this output answers.
    pub fn call_id(&self) -> &str {
        match self {
            ToolOutput::Result { id, .. } | ToolOutput::Error { id, .. } => id,
        }
    }

    /// The name of the invoked tool.
    pub fn tool_name(&self) -> &str {
        match self {
            ToolOutput::Result { name, .. } | ToolOutput::Error { name, .. } => name,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error { .. })
    }

    /// Serialize the output for a tool-role message: the result value, or
    /// an `{"error": ...}` object for failures.
    pub fn payload(&self) -> Value {
        match self {
            ToolOutput::Result { result, .. } => result.clone(),
            ToolOutput::Error { error, .. } => serde_json::json!({ "error": error }),
        }
    }
}
