//! Runtime-wide defaults, grouped by subsystem.

/// Agent loop defaults.
pub mod agent {
    /// Hard ceiling on loop steps unless overridden per run.
    pub const DEFAULT_MAX_STEPS: usize = 50;

    /// Default context budget in tokens.
    pub const DEFAULT_TOKEN_LIMIT: usize = 120_000;

    /// Recursion cap for `spawn_agent`.
    pub const DEFAULT_SPAWN_MAX_DEPTH: usize = 3;

    /// Defaults for spawned sub-agents.
    pub const SPAWN_DEFAULT_MAX_STEPS: usize = 15;
    pub const SPAWN_TOKEN_LIMIT: usize = 50_000;
}

/// Tool dispatch defaults.
pub mod tools {
    use std::time::Duration;

    /// Per-tool execution timeout unless the tool overrides it.
    pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

    /// Tool output beyond this is truncated before entering the transcript.
    pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
}

/// LLM client defaults.
pub mod ai {
    use std::time::Duration;

    pub const DEFAULT_MODEL: &str = "anthropic/claude-3-5-sonnet";
    pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 8_192;
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

    /// Summaries produced by the compactor are asked to stay under this.
    pub const SUMMARY_TOKEN_BOUND: usize = 400;
}

/// Sandbox defaults.
pub mod sandbox {
    pub const DEFAULT_TTL_SECONDS: u64 = 3_600;
    pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
}

/// Directory name under the user's home.
pub const CONFIG_DIR_NAME: &str = ".ensemble";
