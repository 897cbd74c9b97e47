//! Wire types and pure transforms shared by the Iris relay.
//!
//! Two chat schemas are modelled here:
//! - the block-structured `/v1/messages` schema ([`types`]), where a turn carries
//!   ordered content blocks (text, tool use, tool result);
//! - the flat-role `chat/completions` schema ([`chat`]), where a turn carries a
//!   single string or a tool-call list and tool results are `role: tool` messages.
//!
//! [`translation`] maps the first onto the second (and flat messages back into
//! blocks), and [`repair`] splits multi-block tool-result messages for upstreams
//! that reject them.

pub mod chat;
pub mod error;
pub mod repair;
pub mod translation;
pub mod types;

pub use chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool, FunctionCall, FunctionDefinition,
    ToolCall, ToolType,
};
pub use error::TranslateError;
pub use repair::{RepairFilter, RepairLedger};
pub use translation::{into_block_message, translate};
pub use types::{
    ContentBlock, ConversationRequest, Message, MessageContent, Role, SystemBlock, SystemPrompt,
    Tool, ToolResultContent,
};
