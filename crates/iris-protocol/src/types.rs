//! Block-structured (`/v1/messages`) wire types.
//!
//! Notes:
//! - Incoming requests can use shorthand strings for `system` and `message.content`.
//!   These are accepted via `#[serde(untagged)]` enums.
//! - Fields this crate does not interpret (`model`, `max_tokens`, `cache_control`, ...)
//!   are carried in `extra` maps, and unknown block kinds are kept verbatim, so a
//!   request survives a parse/serialise cycle without loss.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A message role in the block-structured schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::PlainText(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::PlainText(text.into()),
        }
    }

    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Content blocks of this message; empty for plain-text content.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::PlainText(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Assistant turns may only carry text and tool use; user turns only text and
    /// tool results. Unknown block kinds are not judged here.
    pub fn role_invariant_holds(&self) -> bool {
        self.blocks().iter().all(|block| match (self.role, block) {
            (Role::Assistant, ContentBlock::ToolResult { .. }) => false,
            (Role::User, ContentBlock::ToolUse { .. }) => false,
            _ => true,
        })
    }
}

/// Either a string shorthand or a full content block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    PlainText(String),
    Blocks(Vec<ContentBlock>),
}

/// A content block within `messages[].content`.
///
/// Serialised with a `type` tag (`text`, `tool_use`, `tool_result`). Any other tag
/// deserialises into [`ContentBlock::Unsupported`] holding the original object.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text {
        text: String,
        extra: Map<String, Value>,
    },

    /// A tool invocation requested by the model.
    ToolUse {
        id: String,
        name: String,
        input: Value,
        extra: Map<String, Value>,
    },

    /// A tool invocation result supplied by the client.
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        is_error: bool,
        extra: Map<String, Value>,
    },

    /// Any block kind this crate does not model (images, thinking, documents...).
    Unsupported { kind: String, raw: Value },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
            extra: Map::new(),
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: ToolResultContent::Text(content.into()),
            is_error,
            extra: Map::new(),
        }
    }

    /// The wire `type` tag of this block.
    pub fn kind(&self) -> &str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::ToolUse { .. } => "tool_use",
            ContentBlock::ToolResult { .. } => "tool_result",
            ContentBlock::Unsupported { kind, .. } => kind,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }

    /// JSON form of this block, `type` tag first and `extra` fields merged in.
    pub fn to_value(&self) -> Value {
        match self {
            ContentBlock::Text { text, extra } => {
                tagged("text", extra, [("text", Value::String(text.clone()))])
            }
            ContentBlock::ToolUse {
                id,
                name,
                input,
                extra,
            } => tagged(
                "tool_use",
                extra,
                [
                    ("id", Value::String(id.clone())),
                    ("name", Value::String(name.clone())),
                    ("input", input.clone()),
                ],
            ),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                extra,
            } => {
                let mut value = tagged(
                    "tool_result",
                    extra,
                    [
                        ("tool_use_id", Value::String(tool_use_id.clone())),
                        ("content", content.to_value()),
                    ],
                );
                if *is_error {
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("is_error".to_string(), Value::Bool(true));
                    }
                }
                value
            }
            ContentBlock::Unsupported { raw, .. } => raw.clone(),
        }
    }
}

fn tagged<const N: usize>(
    kind: &str,
    extra: &Map<String, Value>,
    fields: [(&str, Value); N],
) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String(kind.to_string()));
    for (key, value) in fields {
        obj.insert(key.to_string(), value);
    }
    for (key, value) in extra {
        obj.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Value::Object(obj)
}

#[derive(Deserialize)]
struct TextWire {
    text: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct ToolUseWire {
    id: String,
    name: String,
    #[serde(default)]
    input: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct ToolResultWire {
    tool_use_id: String,
    #[serde(default)]
    content: ToolResultContent,
    #[serde(default)]
    is_error: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut obj = Map::<String, Value>::deserialize(deserializer)?;
        let kind = match obj.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(de::Error::custom("content block `type` must be a string")),
            None => return Err(de::Error::missing_field("type")),
        };

        let block = match kind.as_str() {
            "text" => {
                obj.remove("type");
                let wire: TextWire =
                    serde_json::from_value(Value::Object(obj)).map_err(de::Error::custom)?;
                ContentBlock::Text {
                    text: wire.text,
                    extra: wire.extra,
                }
            }
            "tool_use" => {
                obj.remove("type");
                let wire: ToolUseWire =
                    serde_json::from_value(Value::Object(obj)).map_err(de::Error::custom)?;
                ContentBlock::ToolUse {
                    id: wire.id,
                    name: wire.name,
                    input: wire.input,
                    extra: wire.extra,
                }
            }
            "tool_result" => {
                obj.remove("type");
                let mut wire: ToolResultWire =
                    serde_json::from_value(Value::Object(obj)).map_err(de::Error::custom)?;
                // An explicit `false` is echoed back as sent.
                if wire.is_error == Some(false) {
                    wire.extra.insert("is_error".to_string(), Value::Bool(false));
                }
                ContentBlock::ToolResult {
                    tool_use_id: wire.tool_use_id,
                    content: wire.content,
                    is_error: wire.is_error.unwrap_or(false),
                    extra: wire.extra,
                }
            }
            _ => ContentBlock::Unsupported {
                kind,
                raw: Value::Object(obj),
            },
        };

        Ok(block)
    }
}

/// Tool result content can be a string shorthand or an array of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    pub fn to_value(&self) -> Value {
        match self {
            ToolResultContent::Text(text) => Value::String(text.clone()),
            ToolResultContent::Blocks(blocks) => {
                Value::Array(blocks.iter().map(ContentBlock::to_value).collect())
            }
        }
    }
}

/// System prompt input: a plain string or an array of text blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    PlainText(String),
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// System texts in concatenation order.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            SystemPrompt::PlainText(text) => vec![text.as_str()],
            SystemPrompt::Blocks(blocks) => blocks.iter().map(|b| b.text.as_str()).collect(),
        }
    }
}

/// A system content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: SystemBlockType,
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: SystemBlockType::Text,
            text: text.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemBlockType {
    Text,
}

/// Tool specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input_schema: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request body for `/v1/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Every other top-level field, forwarded untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConversationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system: None,
            messages,
            tools: None,
            extra: Map::new(),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.extra.get("model").and_then(Value::as_str)
    }

    pub fn is_streaming(&self) -> bool {
        self.extra
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
