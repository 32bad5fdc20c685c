//! Token accounting for message lists.
//!
//! Counts with the cl100k_base BPE table when it loads; otherwise estimates
//! at one token per 2.5 UTF-8 characters. Either way each message pays a
//! fixed 4-token framing overhead. No I/O.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::ai::types::ChatMessage;

/// Framing overhead per message (role markers etc).
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Fallback chars-per-token ratio.
const CHARS_PER_TOKEN: f64 = 2.5;

#[derive(Clone)]
pub struct TokenCounter {
    bpe: Option<Arc<CoreBPE>>,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            bpe: tiktoken_rs::cl100k_base().ok().map(Arc::new),
        }
    }

    /// Counter that always uses the character heuristic.
    pub fn heuristic() -> Self {
        Self { bpe: None }
    }

    /// Count tokens across content, thinking, and serialized tool-call
    /// arguments, plus the per-message overhead.
    pub fn count(&self, messages: &[ChatMessage]) -> usize {
        match &self.bpe {
            Some(bpe) => messages
                .iter()
                .map(|msg| self.count_message_bpe(bpe, msg))
                .sum(),
            None => {
                let chars: usize = messages.iter().map(message_chars).sum();
                (chars as f64 / CHARS_PER_TOKEN).ceil() as usize
                    + messages.len() * PER_MESSAGE_OVERHEAD
            }
        }
    }

    fn count_message_bpe(&self, bpe: &CoreBPE, msg: &ChatMessage) -> usize {
        let mut tokens = bpe.encode_ordinary(&msg.content).len();
        if let Some(thinking) = &msg.thinking {
            tokens += bpe.encode_ordinary(thinking).len();
        }
        for call in msg.tool_calls.iter().flatten() {
            tokens += bpe.encode_ordinary(&call.name).len();
            tokens += bpe.encode_ordinary(&call.arguments.to_string()).len();
        }
        tokens + PER_MESSAGE_OVERHEAD
    }
}

fn message_chars(msg: &ChatMessage) -> usize {
    let mut chars = msg.content.chars().count();
    if let Some(thinking) = &msg.thinking {
        chars += thinking.chars().count();
    }
    for call in msg.tool_calls.iter().flatten() {
        chars += call.name.chars().count();
        chars += call.arguments.to_string().chars().count();
    }
    chars
}
