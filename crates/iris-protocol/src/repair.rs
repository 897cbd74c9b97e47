//! Tool-result repair for strict upstreams.
//!
//! Some block-structured upstreams reject a message whose content array mixes a
//! `tool_result` block with other blocks (two tool results, or a tool result plus
//! trailing text). [`RepairFilter`] splits such a message into one single-block
//! message per original block, in place, leaving everything else untouched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::types::{ContentBlock, ConversationRequest, Message, MessageContent};

/// Tool-use ids whose message has already been reported as repaired.
///
/// One instance lives for the whole server process and is shared by every
/// request; entries are never removed.
#[derive(Debug, Default)]
pub struct RepairLedger {
    seen: Mutex<HashSet<String>>,
}

impl RepairLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tool_use_id`, returning `true` only the first time it is seen.
    pub fn first_sighting(&self, tool_use_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(tool_use_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct RepairFilter {
    ledger: Arc<RepairLedger>,
}

impl RepairFilter {
    pub fn new(ledger: Arc<RepairLedger>) -> Self {
        Self { ledger }
    }

    /// Split every multi-block message that carries a tool result.
    ///
    /// Idempotent: split messages hold a single block and are left alone on a
    /// second pass.
    pub fn repair(&self, mut req: ConversationRequest) -> ConversationRequest {
        let mut messages = Vec::with_capacity(req.messages.len());

        for msg in req.messages {
            if !needs_repair(&msg) {
                messages.push(msg);
                continue;
            }

            self.report(&msg);
            messages.extend(split_message(msg));
        }

        req.messages = messages;
        req
    }

    fn report(&self, msg: &Message) {
        let Some(tool_use_id) = msg.blocks().iter().find_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }) else {
            return;
        };

        if self.ledger.first_sighting(tool_use_id) {
            let parts: Vec<&str> = msg.blocks().iter().map(|b| b.kind()).collect();
            info!(tool_use_id = %tool_use_id, ?parts, "fixed tool_result message");
        }
    }
}

/// A message needs repair when it holds more than one block and at least one of
/// them is a tool result.
pub fn needs_repair(msg: &Message) -> bool {
    let blocks = msg.blocks();
    blocks.len() > 1 && blocks.iter().any(|b| b.is_tool_result())
}

/// One message per block, same role, original block order.
pub fn split_message(msg: Message) -> Vec<Message> {
    match msg.content {
        MessageContent::Blocks(blocks) => blocks
            .into_iter()
            .map(|block| Message::with_blocks(msg.role, vec![block]))
            .collect(),
        content @ MessageContent::PlainText(_) => vec![Message {
            role: msg.role,
            content,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use serde_json::json;

    fn filter() -> RepairFilter {
        RepairFilter::new(Arc::new(RepairLedger::new()))
    }

    #[test]
    fn test_splits_two_tool_results() {
        let req = ConversationRequest::new(vec![Message::with_blocks(
            Role::User,
            vec![
                ContentBlock::tool_result("t1", "42", false),
                ContentBlock::tool_result("t2", "err", true),
            ],
        )]);

        let out = filter().repair(req);
        assert_eq!(
            out.messages,
            vec![
                Message::with_blocks(Role::User, vec![ContentBlock::tool_result("t1", "42", false)]),
                Message::with_blocks(Role::User, vec![ContentBlock::tool_result("t2", "err", true)]),
            ]
        );
    }

    #[test]
    fn test_leaves_other_messages_in_place() {
        let req = ConversationRequest::new(vec![
            Message::user("start"),
            Message::with_blocks(
                Role::Assistant,
                vec![ContentBlock::text("calling"), ContentBlock::tool_use("t1", "ls", json!({}))],
            ),
            Message::with_blocks(
                Role::User,
                vec![ContentBlock::tool_result("t1", "ok", false), ContentBlock::text("and then?")],
            ),
            Message::with_blocks(Role::User, vec![ContentBlock::tool_result("t2", "solo", false)]),
        ]);

        let out = filter().repair(req.clone());
        assert_eq!(out.messages.len(), 5);
        assert_eq!(out.messages[0], req.messages[0]);
        assert_eq!(out.messages[1], req.messages[1]);
        assert_eq!(out.messages[2].blocks(), &[ContentBlock::tool_result("t1", "ok", false)]);
        assert_eq!(out.messages[3].blocks(), &[ContentBlock::text("and then?")]);
        assert_eq!(out.messages[4], req.messages[3]);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let req = ConversationRequest::new(vec![Message::with_blocks(
            Role::User,
            vec![
                ContentBlock::text("a"),
                ContentBlock::tool_result("t1", "b", false),
                ContentBlock::text("c"),
            ],
        )]);

        let f = filter();
        let once = f.repair(req);
        let twice = f.repair(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_split_preserves_block_order() {
        let blocks = vec![
            ContentBlock::text("x"),
            ContentBlock::tool_result("t1", "y", false),
            ContentBlock::Unsupported {
                kind: "image".into(),
                raw: json!({"type": "image"}),
            },
        ];
        let req = ConversationRequest::new(vec![Message::with_blocks(Role::User, blocks.clone())]);

        let out = filter().repair(req);
        let rebuilt: Vec<ContentBlock> = out
            .messages
            .iter()
            .inspect(|m| assert_eq!(m.blocks().len(), 1))
            .flat_map(|m| m.blocks().to_vec())
            .collect();
        assert_eq!(rebuilt, blocks);
    }

    #[test]
    fn test_ledger_reports_each_id_once() {
        let ledger = Arc::new(RepairLedger::new());
        let f = RepairFilter::new(ledger.clone());
        let req = ConversationRequest::new(vec![Message::with_blocks(
            Role::User,
            vec![ContentBlock::tool_result("t1", "a", false), ContentBlock::text("b")],
        )]);

        f.repair(req.clone());
        f.repair(req);
        assert_eq!(ledger.len(), 1);
        assert!(!ledger.first_sighting("t1"));
        assert!(ledger.first_sighting("t2"));
    }

    #[test]
    fn test_text_only_multi_block_is_untouched() {
        let msg = Message::with_blocks(Role::User, vec![ContentBlock::text("a"), ContentBlock::text("b")]);
        assert!(!needs_repair(&msg));
    }
}
