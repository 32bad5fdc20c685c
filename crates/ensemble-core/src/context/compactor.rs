//! LLM-driven history compaction.
//!
//! The message list is partitioned into segments: the system head stays
//! verbatim, each user message opens a segment and the assistant/tool
//! messages after it close it. Closed segments (except the most recent) are
//! replaced by `[user_i, assistant(summary_i)]`. When summaries alone don't
//! fit, the oldest summaries are merged bottom-up, then dropped in
//! (user, summary) pairs. The system head is never dropped.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::TokenCounter;
use crate::ai::types::{ChatMessage, Role};
use crate::ai::ModelBackend;
use crate::constants;

/// Compaction could not bring the list under the limit.
#[derive(Debug)]
pub enum CompactionError {
    /// Even the system head plus the most recent segment exceed the limit.
    Overflow { tokens: usize, limit: usize },
}

impl fmt::Display for CompactionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow { tokens, limit } => {
                write!(f, "context overflow: {tokens} tokens after compaction, limit {limit}")
            }
        }
    }
}

impl std::error::Error for CompactionError {}

/// One user-opened slice of the conversation.
struct Segment {
    user: ChatMessage,
    body: Vec<ChatMessage>,
    /// True when `body` is already a single summary turn.
    summarized: bool,
}

pub struct Compactor {
    backend: Arc<dyn ModelBackend>,
    counter: TokenCounter,
}

impl Compactor {
    pub fn new(backend: Arc<dyn ModelBackend>, counter: TokenCounter) -> Self {
        Self { backend, counter }
    }

    /// Compact `messages` under `limit` tokens, or return them unchanged if
    /// they already fit.
    pub async fn maybe_compact(
        &self,
        messages: Vec<ChatMessage>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CompactionError> {
        let before = self.counter.count(&messages);
        if before <= limit {
            return Ok(messages);
        }

        let (head, mut segments) = partition(messages);

        // Not enough history to summarize: only the live segment exists.
        if segments.len() < 2 {
            let rebuilt = rebuild(&head, &segments);
            let tokens = self.counter.count(&rebuilt);
            return Err(CompactionError::Overflow { tokens, limit });
        }

        // Pass 1: summarize every closed segment except the most recent.
        let last = segments.len() - 1;
        for (round, segment) in segments[..last].iter_mut().enumerate() {
            if segment.body.is_empty() {
                continue;
            }
            let summary = self.summarize(&segment.body, round + 1).await;
            segment.body = vec![ChatMessage::assistant(summary)];
            segment.summarized = true;
        }

        let mut rebuilt = rebuild(&head, &segments);
        let mut tokens = self.counter.count(&rebuilt);
        info!(before, after = tokens, limit, "compacted message history");
        if tokens <= limit {
            return Ok(rebuilt);
        }

        // Pass 2: merge the oldest summaries together, bottom-up.
        while tokens > limit && summarized_count(&segments) > 1 {
            let merged = self.merge_oldest_pair(&mut segments).await;
            if !merged {
                break;
            }
            rebuilt = rebuild(&head, &segments);
            tokens = self.counter.count(&rebuilt);
        }

        // Pass 3: drop the oldest (user, summary) pairs entirely.
        while tokens > limit && segments.len() > 1 {
            segments.remove(0);
            rebuilt = rebuild(&head, &segments);
            tokens = self.counter.count(&rebuilt);
        }

        if tokens > limit {
            return Err(CompactionError::Overflow { tokens, limit });
        }
        Ok(rebuilt)
    }

    /// Merge the two oldest summarized segments into one. Returns false when
    /// no adjacent summarized pair exists at the front.
    async fn merge_oldest_pair(&self, segments: &mut Vec<Segment>) -> bool {
        if segments.len() < 2 || !segments[0].summarized || !segments[1].summarized {
            return false;
        }
        let first = segments.remove(0);
        let second = &mut segments[0];

        let combined = format!(
            "{}\n{}\n{}\n{}",
            first.user.content,
            first.body.first().map(|m| m.content.as_str()).unwrap_or(""),
            second.user.content,
            second.body.first().map(|m| m.content.as_str()).unwrap_or(""),
        );
        let merged = self
            .summarize(&[ChatMessage::assistant(combined)], 0)
            .await;

        second.user = ChatMessage::user("[earlier conversation, condensed]");
        second.body = vec![ChatMessage::assistant(merged)];
        true
    }

    /// Produce a bounded summary of one execution round. LLM failures fall
    /// back to a mechanical digest so compaction itself never blocks a run.
    async fn summarize(&self, body: &[ChatMessage], round: usize) -> String {
        let transcript = render_transcript(body);
        let instruction = format!(
            "Summarize the following agent execution round in at most {} tokens. \
             Preserve: the stated goals, every tool call made and its effect, \
             and any decisions reached. Plain prose, no preamble.\n\n{}",
            constants::ai::SUMMARY_TOKEN_BOUND,
            transcript
        );
        let request = vec![
            ChatMessage::system("You condense agent execution transcripts without losing intent."),
            ChatMessage::user(instruction),
        ];

        match self.backend.generate(&request, &[], None).await {
            Ok(response) if !response.content.is_empty() => response.content,
            Ok(_) => fallback_digest(body, round),
            Err(e) => {
                warn!("summary generation failed, using digest: {e}");
                fallback_digest(body, round)
            }
        }
    }
}

/// Split into a verbatim head (leading system message) and user-opened
/// segments.
fn partition(messages: Vec<ChatMessage>) -> (Vec<ChatMessage>, Vec<Segment>) {
    let mut head = Vec::new();
    let mut segments: Vec<Segment> = Vec::new();

    for msg in messages {
        if msg.role == Role::User && msg.tool_call_id.is_none() {
            segments.push(Segment {
                user: msg,
                body: Vec::new(),
                summarized: false,
            });
        } else if let Some(current) = segments.last_mut() {
            current.body.push(msg);
        } else {
            head.push(msg);
        }
    }

    (head, segments)
}

fn rebuild(head: &[ChatMessage], segments: &[Segment]) -> Vec<ChatMessage> {
    let mut out = head.to_vec();
    for segment in segments {
        out.push(segment.user.clone());
        out.extend(segment.body.iter().cloned());
    }
    out
}

fn summarized_count(segments: &[Segment]) -> usize {
    segments.iter().filter(|s| s.summarized).count()
}

/// Render a segment body the way the summarizer sees it: assistant text,
/// tool calls by name, tool outputs truncated.
fn render_transcript(body: &[ChatMessage]) -> String {
    let mut out = String::new();
    for msg in body {
        match msg.role {
            Role::Assistant => {
                if !msg.content.is_empty() {
                    out.push_str("Assistant: ");
                    out.push_str(&msg.content);
                    out.push('\n');
                }
                for call in msg.tool_calls.iter().flatten() {
                    out.push_str(&format!("  -> called tool: {}\n", call.name));
                }
            }
            Role::Tool => {
                let preview: String = msg.content.chars().take(500).collect();
                out.push_str(&format!("  <- tool returned: {preview}\n"));
            }
            _ => {}
        }
    }
    out
}

fn fallback_digest(body: &[ChatMessage], round: usize) -> String {
    let tools: Vec<&str> = body
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|c| c.name.as_str())
        .collect();
    if tools.is_empty() {
        format!("Round {round}: {} messages exchanged.", body.len())
    } else {
        format!(
            "Round {round}: {} messages exchanged; tools called: {}.",
            body.len(),
            tools.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::{LlmResponse, StreamPart, ToolDef};
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Backend whose every generate() returns a fixed short summary.
    struct ScriptedSummarizer;

    #[async_trait]
    impl ModelBackend for ScriptedSummarizer {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDef],
            _max_tokens: Option<usize>,
        ) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: "condensed".to_string(),
                ..Default::default()
            })
        }

        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDef],
            _max_tokens: Option<usize>,
        ) -> Result<mpsc::UnboundedReceiver<StreamPart>> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }
    }

    fn compactor() -> Compactor {
        Compactor::new(Arc::new(ScriptedSummarizer), TokenCounter::heuristic())
    }

    fn history(pairs: usize, reply_len: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("You are terse.")];
        for i in 0..pairs {
            messages.push(ChatMessage::user(format!("question {i}")));
            messages.push(ChatMessage::assistant("x".repeat(reply_len)));
        }
        messages
    }

    #[tokio::test]
    async fn under_limit_is_untouched() {
        let messages = history(2, 20);
        let out = compactor().maybe_compact(messages.clone(), 10_000).await.unwrap();
        assert_eq!(out.len(), messages.len());
        assert_eq!(out[0].content, messages[0].content);
    }

    #[tokio::test]
    async fn over_limit_summarizes_all_but_last_segment() {
        let counter = TokenCounter::heuristic();
        let messages = history(6, 400);
        let limit = 700;
        assert!(counter.count(&messages) > limit);

        let out = compactor().maybe_compact(messages.clone(), limit).await.unwrap();

        // System head byte-identical.
        assert_eq!(out[0].content, messages[0].content);
        assert_eq!(out[0].role, Role::System);

        // Most recent pair unchanged.
        let last_user = &out[out.len() - 2];
        let last_reply = &out[out.len() - 1];
        assert_eq!(last_user.content, "question 5");
        assert_eq!(last_reply.content, "x".repeat(400));

        // Earlier rounds replaced by short summaries.
        assert!(out
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .take(out.len() - 1)
            .any(|m| m.content == "condensed"));
        assert!(counter.count(&out) <= limit);
    }

    #[tokio::test]
    async fn drops_oldest_pairs_when_summaries_do_not_fit() {
        let counter = TokenCounter::heuristic();
        // Long user messages: summaries can't shrink those, so pairs must drop.
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..5 {
            messages.push(ChatMessage::user(format!("{i}{}", "u".repeat(300))));
            messages.push(ChatMessage::assistant("a".repeat(300)));
        }
        let limit = 260;
        let out = compactor().maybe_compact(messages, limit).await.unwrap();

        assert_eq!(out[0].content, "sys");
        assert!(counter.count(&out) <= limit);
        // The live segment survived.
        assert!(out.iter().any(|m| m.content.starts_with('4')));
    }

    #[tokio::test]
    async fn overflow_when_live_segment_alone_exceeds_limit() {
        let mut messages = vec![ChatMessage::system("sys")];
        messages.push(ChatMessage::user("u".repeat(5_000)));
        messages.push(ChatMessage::assistant("a".repeat(5_000)));

        let err = compactor().maybe_compact(messages, 100).await.unwrap_err();
        let CompactionError::Overflow { tokens, limit } = err;
        assert!(tokens > limit);
    }

    #[test]
    fn partition_keeps_tool_results_inside_segments() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("go"),
            ChatMessage::assistant("calling"),
            ChatMessage::tool("out", "c1", "echo"),
        ];
        let (head, segments) = partition(messages);
        assert_eq!(head.len(), 1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].body.len(), 2);
    }
}
