use std::sync::Arc;

use iris_protocol::{
    translate, ChatMessage, ChatRole, ConversationRequest, RepairFilter, RepairLedger,
    TranslateError,
};
use serde_json::{json, Value};

fn parse(value: Value) -> ConversationRequest {
    serde_json::from_value(value).expect("valid conversation request")
}

#[test]
fn repaired_tool_results_translate_to_tool_messages() {
    let req = parse(json!({
        "model": "claude-sonnet-4",
        "messages": [{
            "role": "user",
            "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "42", "is_error": false},
                {"type": "tool_result", "tool_use_id": "t2", "content": "err", "is_error": true}
            ]
        }]
    }));

    let repaired = RepairFilter::new(Arc::new(RepairLedger::new())).repair(req);
    assert_eq!(repaired.messages.len(), 2);
    for msg in &repaired.messages {
        assert_eq!(msg.role.as_str(), "user");
        assert_eq!(msg.blocks().len(), 1);
    }

    let out = translate(&repaired, "glm-4.5").unwrap();
    assert_eq!(
        out.messages,
        vec![
            ChatMessage::tool_result("t1", "42"),
            ChatMessage::tool_result("t2", "err"),
        ]
    );
}

#[test]
fn full_agent_turn_translates_in_order() {
    let req = parse(json!({
        "model": "claude-sonnet-4",
        "system": [
            {"type": "text", "text": "You are a coding agent."},
            {"type": "text", "text": "Be brief."}
        ],
        "messages": [
            {"role": "user", "content": "list the repo"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Listing."},
                {"type": "tool_use", "id": "toolu_01", "name": "Bash", "input": {"command": "ls"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_01", "content": "Cargo.toml\nsrc"}
            ]}
        ],
        "tools": [
            {"name": "Bash", "description": "Run a command", "input_schema": {"type": "object"}}
        ]
    }));

    let out = serde_json::to_value(translate(&req, "glm-4.5").unwrap()).unwrap();

    assert_eq!(
        out,
        json!({
            "model": "glm-4.5",
            "messages": [
                {"role": "system", "content": "You are a coding agent."},
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "list the repo"},
                {"role": "assistant", "content": "Listing."},
                {"role": "assistant", "tool_calls": [{
                    "id": "toolu_01",
                    "type": "function",
                    "function": {"name": "Bash", "arguments": "{\"command\":\"ls\"}"}
                }]},
                {"role": "tool", "content": "Cargo.toml\nsrc", "tool_call_id": "toolu_01"}
            ],
            "tools": [{
                "type": "function",
                "function": {"name": "Bash", "description": "Run a command", "parameters": {"type": "object"}}
            }]
        })
    );
}

#[test]
fn image_block_is_rejected() {
    let req = parse(json!({
        "messages": [{"role": "user", "content": [
            {"type": "text", "text": "what is this"},
            {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AA=="}}
        ]}]
    }));

    assert_eq!(
        translate(&req, "glm-4.5").unwrap_err(),
        TranslateError::UnsupportedContentKind("image".to_string())
    );
}

#[test]
fn repair_keeps_unknown_fields_and_blocks() {
    let raw = json!({
        "model": "MiniMax-M2",
        "max_tokens": 32000,
        "stream": true,
        "metadata": {"user_id": "abc"},
        "messages": [{"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": "done"},
            {"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}},
            {"type": "text", "text": "continue", "cache_control": {"type": "ephemeral"}}
        ]}]
    });

    let repaired = RepairFilter::new(Arc::new(RepairLedger::new())).repair(parse(raw));
    let out = serde_json::to_value(&repaired).unwrap();

    assert_eq!(out["model"], "MiniMax-M2");
    assert_eq!(out["max_tokens"], 32000);
    assert_eq!(out["stream"], true);
    assert_eq!(out["metadata"], json!({"user_id": "abc"}));
    assert_eq!(
        out["messages"],
        json!([
            {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "done"}]},
            {"role": "user", "content": [{"type": "image", "source": {"type": "url", "url": "https://example.com/a.png"}}]},
            {"role": "user", "content": [{"type": "text", "text": "continue", "cache_control": {"type": "ephemeral"}}]}
        ])
    );
    assert!(repaired.is_streaming());
}

#[test]
fn text_only_conversation_never_sets_tool_calls() {
    let req = parse(json!({
        "messages": [
            {"role": "user", "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]},
            {"role": "assistant", "content": [{"type": "text", "text": "c"}]},
            {"role": "user", "content": "d"}
        ]
    }));

    let out = translate(&req, "m").unwrap();
    let expected = [
        (ChatRole::User, "a\nb"),
        (ChatRole::Assistant, "c"),
        (ChatRole::User, "d"),
    ];
    assert_eq!(out.messages.len(), expected.len());
    for (msg, (role, text)) in out.messages.iter().zip(expected) {
        assert_eq!(msg.role, role);
        assert_eq!(msg.content.as_deref(), Some(text));
        assert!(msg.tool_calls.is_none());
    }
}
