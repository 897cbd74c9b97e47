//! Block-structured <-> flat-role translation.
//!
//! - `/v1/messages` request -> `chat/completions` request ([`translate`])
//! - `chat/completions` message -> `/v1/messages` message ([`into_block_message`])

use serde_json::{json, Value};

use crate::chat::{
    ChatCompletionRequest, ChatMessage, ChatRole, ChatTool, FunctionDefinition, ToolCall, ToolType,
};
use crate::error::TranslateError;
use crate::types::{
    ContentBlock, ConversationRequest, Message, MessageContent, Role, Tool, ToolResultContent,
};

/// Convert a block-structured request into a flat-role `chat/completions` request
/// addressed to `model`.
///
/// System texts come first, then every conversation message expanded in order.
/// Fails without producing a partial request if any block (including blocks nested
/// in a tool result) is not text, tool use, or tool result.
pub fn translate(
    req: &ConversationRequest,
    model: &str,
) -> Result<ChatCompletionRequest, TranslateError> {
    let mut messages: Vec<ChatMessage> = Vec::new();

    if let Some(system) = &req.system {
        messages.extend(system.texts().into_iter().map(ChatMessage::system));
    }

    for msg in &req.messages {
        messages.extend(translate_message(msg)?);
    }

    let tools = req
        .tools
        .as_deref()
        .filter(|tools| !tools.is_empty())
        .map(translate_tools);

    Ok(ChatCompletionRequest {
        model: model.to_string(),
        messages,
        tools,
    })
}

/// Expand one block-structured message into its flat-role messages.
///
/// A message made only of text blocks becomes one message with the texts joined
/// by `\n`. Any other block list maps one block to one message, in block order.
pub fn translate_message(msg: &Message) -> Result<Vec<ChatMessage>, TranslateError> {
    let role = ChatRole::from(msg.role);

    let blocks = match &msg.content {
        MessageContent::PlainText(text) => return Ok(vec![ChatMessage::text(role, text.clone())]),
        MessageContent::Blocks(blocks) => blocks,
    };

    if let Some(texts) = all_texts(blocks) {
        return Ok(vec![ChatMessage::text(role, texts.join("\n"))]);
    }

    blocks
        .iter()
        .map(|block| translate_block(role, block))
        .collect()
}

fn all_texts(blocks: &[ContentBlock]) -> Option<Vec<&str>> {
    if blocks.is_empty() {
        return None;
    }
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn translate_block(role: ChatRole, block: &ContentBlock) -> Result<ChatMessage, TranslateError> {
    match block {
        ContentBlock::Text { text, .. } => Ok(ChatMessage::text(role, text.clone())),
        ContentBlock::ToolUse { id, name, input, .. } => Ok(ChatMessage::with_tool_calls(
            role,
            vec![ToolCall::function(id.clone(), name.clone(), input.to_string())],
        )),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => Ok(ChatMessage::tool_result(
            tool_use_id.clone(),
            tool_result_text(content)?,
        )),
        ContentBlock::Unsupported { kind, .. } => {
            Err(TranslateError::UnsupportedContentKind(kind.clone()))
        }
    }
}

/// Map tool definitions one-to-one, order preserved.
pub fn translate_tools(tools: &[Tool]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|t| ChatTool {
            kind: ToolType::Function,
            function: FunctionDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

fn tool_result_text(content: &ToolResultContent) -> Result<String, TranslateError> {
    match content {
        ToolResultContent::Text(text) => Ok(text.clone()),
        ToolResultContent::Blocks(blocks) => {
            let mut parts = Vec::with_capacity(blocks.len());
            for block in blocks {
                match block {
                    ContentBlock::Text { text, .. } => parts.push(text.as_str()),
                    other => {
                        return Err(TranslateError::UnsupportedContentKind(
                            other.kind().to_string(),
                        ))
                    }
                }
            }
            Ok(parts.join("\n"))
        }
    }
}

/// Interpret a flat-role message as a block-structured message.
///
/// Tool calls become `tool_use` blocks (with any text first), `tool` messages become
/// a user turn holding one `tool_result`. Arguments that are not valid JSON are kept
/// as `{"raw": arguments}`.
pub fn into_block_message(msg: &ChatMessage) -> Result<Message, TranslateError> {
    let role = match msg.role {
        ChatRole::User => Role::User,
        ChatRole::Assistant => Role::Assistant,
        ChatRole::Tool => {
            return Ok(Message::with_blocks(
                Role::User,
                vec![ContentBlock::tool_result(
                    msg.tool_call_id.clone().unwrap_or_default(),
                    msg.content.clone().unwrap_or_default(),
                    false,
                )],
            ));
        }
        ChatRole::System => {
            return Err(TranslateError::UnrepresentableRole(
                ChatRole::System.as_str().to_string(),
            ))
        }
    };

    let calls = msg.tool_calls.as_deref().unwrap_or_default();
    if calls.is_empty() {
        return Ok(Message {
            role,
            content: MessageContent::PlainText(msg.content.clone().unwrap_or_default()),
        });
    }

    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text));
    }
    blocks.extend(tool_calls_to_blocks(calls));

    Ok(Message::with_blocks(role, blocks))
}

/// Decode flat-role tool calls into `tool_use` blocks.
pub fn tool_calls_to_blocks(calls: &[ToolCall]) -> Vec<ContentBlock> {
    calls
        .iter()
        .map(|call| {
            let input: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| json!({"raw": call.function.arguments}));
            ContentBlock::tool_use(call.id.clone(), call.function.name.clone(), input)
        })
        .collect()
}
