//! MCP transports.
//!
//! Stdio spawns the server process and exchanges newline-delimited JSON-RPC
//! over its pipes; the process dies with the transport (kill-on-drop).
//! SSE/HTTP servers are dialed as JSON-RPC over HTTP POST; the long-lived
//! event channel those transports offer is not needed for tool calls.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Transport over a spawned server process.
///
/// Exchanges are serialized: one lock covers write-request plus
/// read-until-matching-id, so there is never more than one response in
/// flight to match. Server-initiated notifications and stale responses
/// (from a timed-out earlier exchange) are skipped on the way.
pub struct StdioTransport {
    child: Mutex<Child>,
    io: Mutex<StdioPipes>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn MCP server: {command}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("MCP server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("MCP server stdout unavailable"))?;

        Ok(Self {
            child: Mutex::new(child),
            io: Mutex::new(StdioPipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
        })
    }

    /// Fire-and-forget line (notifications).
    pub async fn write_line(&self, json: &str) -> Result<()> {
        let mut pipes = self.io.lock().await;
        write_json_line(&mut pipes.stdin, json).await
    }

    /// One request/response round trip: write the request line, then read
    /// lines until the response carrying `expect_id` arrives.
    pub async fn exchange(&self, json: &str, expect_id: i64) -> Result<String> {
        let mut pipes = self.io.lock().await;
        write_json_line(&mut pipes.stdin, json).await?;

        let mut line = String::new();
        loop {
            line.clear();
            if pipes.stdout.read_line(&mut line).await? == 0 {
                return Err(anyhow!("MCP server closed its stdout"));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match message_id(trimmed) {
                Some(id) if id == expect_id => return Ok(trimmed.to_string()),
                Some(stale) => {
                    warn!("discarding stale MCP response (id {stale}, waiting for {expect_id})")
                }
                None => debug!("skipping MCP notification line"),
            }
        }
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }
}

async fn write_json_line(stdin: &mut ChildStdin, json: &str) -> Result<()> {
    stdin.write_all(json.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// The `id` of a JSON-RPC line, if it is a response at all.
fn message_id(line: &str) -> Option<i64> {
    serde_json::from_str::<Value>(line).ok()?.get("id")?.as_i64()
}

/// Transport over HTTP POST for `sse`/`http` configured servers.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// POST one JSON-RPC request and return the raw response body.
    pub async fn round_trip(&self, json: &str) -> Result<String> {
        debug!(url = %self.url, "mcp http round trip");
        let response = self
            .http
            .post(&self.url)
            .header("content-type", "application/json")
            .body(json.to_string())
            .send()
            .await
            .with_context(|| format!("MCP http request to {} failed", self.url))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("MCP server returned {status}: {body}"));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exchange_matches_response_by_id() {
        // cat echoes the request line straight back.
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), Path::new("."))
            .await
            .unwrap();

        let request = r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#;
        let body = transport.exchange(request, 7).await.unwrap();
        assert_eq!(body, request);
        assert!(transport.is_alive().await);
    }

    #[tokio::test]
    async fn exchange_skips_notifications_and_stale_responses() {
        let transport = StdioTransport::spawn("cat", &[], &HashMap::new(), Path::new("."))
            .await
            .unwrap();

        // Park a notification and a stale response in the pipe; cat echoes
        // both back ahead of the real exchange.
        transport
            .write_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
            .await
            .unwrap();
        transport
            .write_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#)
            .await
            .unwrap();

        let request = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let body = transport.exchange(request, 2).await.unwrap();
        assert_eq!(body, request);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let result = StdioTransport::spawn(
            "/nonexistent/mcp-server",
            &[],
            &HashMap::new(),
            Path::new("."),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn message_id_distinguishes_responses_from_notifications() {
        assert_eq!(message_id(r#"{"id":3,"result":{}}"#), Some(3));
        assert_eq!(message_id(r#"{"method":"notifications/progress"}"#), None);
        assert_eq!(message_id("not json"), None);
    }
}
