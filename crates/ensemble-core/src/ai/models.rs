//! Model id normalization and the provider table.
//!
//! Model ids are canonicalized to `provider/model`. An explicit prefix wins;
//! otherwise the family is guessed by substring, and unknown families default
//! to `openai/`.

use serde::{Deserialize, Serialize};

/// Providers the client knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Gemini,
    Mistral,
    Together,
}

/// Request dialect spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI chat/completions and the OpenAI-compatible endpoints the other
    /// providers expose.
    OpenAi,
}

impl Provider {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            "mistral" => Some(Self::Mistral),
            "together" => Some(Self::Together),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
            Self::Together => "together",
        }
    }

    pub fn api_format(self) -> ApiFormat {
        match self {
            Self::Anthropic => ApiFormat::Anthropic,
            // Gemini, Mistral and Together are dialed through their
            // OpenAI-compatible endpoints.
            _ => ApiFormat::OpenAi,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            Self::Mistral => "https://api.mistral.ai/v1/chat/completions",
            Self::Together => "https://api.together.xyz/v1/chat/completions",
        }
    }

    /// Known ceiling on output tokens. Requests above it are capped.
    pub fn max_output_ceiling(self) -> usize {
        match self {
            Self::Anthropic => 64_000,
            Self::OpenAi => 32_768,
            Self::Gemini => 65_536,
            Self::Mistral => 32_768,
            Self::Together => 16_384,
        }
    }
}

/// Guess the provider for a bare model name. Consulted left-to-right; the
/// first matching substring wins.
fn heuristic_provider(model: &str) -> Provider {
    let lower = model.to_ascii_lowercase();
    const TABLE: &[(&str, Provider)] = &[
        ("claude", Provider::Anthropic),
        ("gpt", Provider::OpenAi),
        ("o1", Provider::OpenAi),
        ("o3", Provider::OpenAi),
        ("gemini", Provider::Gemini),
        ("mistral", Provider::Mistral),
        ("llama", Provider::Together),
    ];
    for (needle, provider) in TABLE {
        if lower.contains(needle) {
            return *provider;
        }
    }
    Provider::OpenAi
}

/// Canonicalize a model id to `provider/model`.
pub fn normalize_model(model: &str) -> String {
    let (provider, bare) = split_model(model);
    format!("{}/{}", provider.as_str(), bare)
}

/// Split a (possibly prefixed) model id into provider and bare model name.
pub fn split_model(model: &str) -> (Provider, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        if let Some(provider) = Provider::from_prefix(prefix) {
            return (provider, rest);
        }
    }
    (heuristic_provider(model), model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_prefix_wins() {
        assert_eq!(normalize_model("together/claude-clone"), "together/claude-clone");
        assert_eq!(split_model("anthropic/claude-3-5-sonnet").0, Provider::Anthropic);
    }

    #[test]
    fn heuristics_by_substring() {
        assert_eq!(normalize_model("claude-3-5-sonnet"), "anthropic/claude-3-5-sonnet");
        assert_eq!(normalize_model("gpt-4o"), "openai/gpt-4o");
        assert_eq!(normalize_model("o3-mini"), "openai/o3-mini");
        assert_eq!(normalize_model("gemini-2.0-flash"), "gemini/gemini-2.0-flash");
        assert_eq!(normalize_model("mistral-large"), "mistral/mistral-large");
        assert_eq!(normalize_model("llama-3.1-70b"), "together/llama-3.1-70b");
    }

    #[test]
    fn unknown_defaults_to_openai() {
        assert_eq!(normalize_model("qwen-72b"), "openai/qwen-72b");
    }

    #[test]
    fn unknown_prefix_is_treated_as_bare_name() {
        // "acme/claude-x" has no registered "acme" provider, so the heuristic
        // runs on the whole string and lands on anthropic.
        assert_eq!(split_model("acme/claude-x").0, Provider::Anthropic);
    }
}
