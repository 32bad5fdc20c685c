//! LLM client configuration.

use std::time::Duration;

use crate::ai::models::{normalize_model, split_model, ApiFormat, Provider};
use crate::config::RuntimeConfig;
use crate::constants;

/// Configuration for one [`super::LlmClient`].
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Normalized `provider/model` id.
    pub model: String,
    pub api_key: Option<String>,
    /// Endpoint override; defaults to the provider's endpoint.
    pub base_url: Option<String>,
    /// Default output budget when the caller passes none.
    pub max_tokens: usize,
    pub timeout: Duration,
}

impl LlmClientConfig {
    pub fn new(model: &str) -> Self {
        Self {
            model: normalize_model(model),
            api_key: None,
            base_url: None,
            max_tokens: constants::ai::DEFAULT_MAX_OUTPUT_TOKENS,
            timeout: constants::ai::REQUEST_TIMEOUT,
        }
    }

    pub fn from_runtime(config: &RuntimeConfig) -> Self {
        Self {
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            max_tokens: constants::ai::DEFAULT_MAX_OUTPUT_TOKENS,
            timeout: constants::ai::REQUEST_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn provider(&self) -> Provider {
        split_model(&self.model).0
    }

    /// Bare model name without the provider prefix.
    pub fn bare_model(&self) -> &str {
        split_model(&self.model).1
    }

    pub fn api_format(&self) -> ApiFormat {
        self.provider().api_format()
    }

    pub fn api_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider().default_base_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_normalizes_model_and_resolves_provider() {
        let config = LlmClientConfig::new("claude-3-5-sonnet");
        assert_eq!(config.model, "anthropic/claude-3-5-sonnet");
        assert_eq!(config.provider(), Provider::Anthropic);
        assert_eq!(config.bare_model(), "claude-3-5-sonnet");
        assert!(config.api_url().contains("anthropic.com"));
    }

    #[test]
    fn base_url_override_wins() {
        let config = LlmClientConfig::new("gpt-4o").with_base_url("http://localhost:9999/v1");
        assert_eq!(config.api_url(), "http://localhost:9999/v1");
    }
}
