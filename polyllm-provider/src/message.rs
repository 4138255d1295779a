use serde::{Deserialize, Serialize};

/// The role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions that frame the conversation.
    System,
    /// Content authored by the end user.
    User,
    /// Content produced by the model.
    Assistant,
    /// The result of a tool invocation, fed back to the model.
    Tool,
}

/// Where image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// A remote URL. Not every dialect accepts URLs; those that do not
    /// reject the request with `ErrorKind::InvalidRequest`.
    Url(String),
    /// Raw image bytes, base64-encoded on the wire by the dialect.
    Bytes(Vec<u8>),
}

/// One fragment of a message.
///
/// Text and images are carried by every dialect. The remaining variants are
/// opaque blob references; a dialect that cannot express them fails the
/// request with `ErrorKind::Unsupported` instead of silently dropping them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Audio {
        data: Vec<u8>,
        media_type: String,
    },
    Video {
        data: Vec<u8>,
        media_type: String,
    },
    File {
        data: Vec<u8>,
        media_type: String,
    },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    /// Create an image part from a URL.
    pub fn image_url(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Part::Image {
            source: ImageSource::Url(url.into()),
            media_type: media_type.into(),
            detail: None,
        }
    }

    /// Create an image part from raw bytes.
    pub fn image_bytes(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Part::Image {
            source: ImageSource::Bytes(bytes),
            media_type: media_type.into(),
            detail: None,
        }
    }

    /// Returns the text content if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single conversation message: a role plus an ordered list of parts.
///
/// Invariants: `parts` is never empty; for [`Role::Tool`] messages the
/// `name` field carries the id of the tool call the message answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a message with an arbitrary role and parts.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        debug_assert!(!parts.is_empty(), "a message must have at least one part");
        Self {
            role,
            parts,
            name: None,
        }
    }

    /// Create a system message from plain text.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Part::text(text)])
    }

    /// Create a user message from plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create a user message from parts (text, images, ...).
    pub fn user_parts(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    /// Create an assistant message from plain text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Create a tool-result message. `call_id` is the id of the tool call
    /// this message answers; `payload` is the serialized result.
    pub fn tool_result(call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            parts: vec![Part::text(payload)],
            name: Some(call_id.into()),
        }
    }

    /// Concatenated text of every text part, joined with a newline.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns true when every part is a text part.
    pub fn is_text_only(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Text { .. }))
    }
}
