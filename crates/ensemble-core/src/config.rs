//! Runtime configuration from environment variables.
//!
//! Read once at startup. Malformed numeric values are configuration errors
//! and refuse to start rather than silently falling back.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::ai::models::normalize_model;
use crate::constants;

/// Process-wide configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Default model id, normalized to `provider/model`.
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    /// Hard ceiling on loop steps.
    pub max_steps: usize,
    /// Default context budget.
    pub token_limit: usize,
    /// Spawn recursion cap.
    pub spawn_max_depth: usize,
    pub enable_mcp: bool,
    pub mcp_config_path: Option<PathBuf>,
    pub enable_sandbox: bool,
    pub sandbox_base_url: String,
    pub sandbox_ttl_seconds: u64,
    /// Base directory for the file session backend.
    pub sessions_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: constants::ai::DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: None,
            max_steps: constants::agent::DEFAULT_MAX_STEPS,
            token_limit: constants::agent::DEFAULT_TOKEN_LIMIT,
            spawn_max_depth: constants::agent::DEFAULT_SPAWN_MAX_DEPTH,
            enable_mcp: false,
            mcp_config_path: None,
            enable_sandbox: false,
            sandbox_base_url: constants::sandbox::DEFAULT_BASE_URL.to_string(),
            sandbox_ttl_seconds: constants::sandbox::DEFAULT_TTL_SECONDS,
            sessions_dir: crate::paths::sessions_dir(),
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.model = normalize_model(&model);
        }
        config.api_key = std::env::var("LLM_API_KEY").ok();
        config.api_base = std::env::var("LLM_API_BASE").ok();

        if let Some(v) = parse_env("AGENT_MAX_STEPS")? {
            config.max_steps = v;
        }
        if let Some(v) = parse_env("TOKEN_LIMIT")? {
            config.token_limit = v;
        }
        if let Some(v) = parse_env("SPAWN_AGENT_MAX_DEPTH")? {
            config.spawn_max_depth = v;
        }
        if let Some(v) = parse_env::<u64>("SANDBOX_TTL_SECONDS")? {
            config.sandbox_ttl_seconds = v;
        }

        config.enable_mcp = env_flag("ENABLE_MCP");
        config.mcp_config_path = std::env::var("MCP_CONFIG_PATH").ok().map(PathBuf::from);
        config.enable_sandbox = env_flag("ENABLE_SANDBOX");
        if let Ok(url) = std::env::var("SANDBOX_BASE_URL") {
            config.sandbox_base_url = url;
        }
        if let Ok(dir) = std::env::var("SESSIONS_DIR") {
            config.sessions_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.token_limit, 120_000);
        assert_eq!(config.spawn_max_depth, 3);
        assert_eq!(config.sandbox_ttl_seconds, 3_600);
        assert!(!config.enable_mcp);
    }
}
