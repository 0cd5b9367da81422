use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Engine-wide settings. Every section is optional in the TOML file; absent
/// sections and fields fall back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Default working directory for commands that do not name one.
    /// Falls back to the engine process's current directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub visibility: VisibilityConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Unconditional upper bound on a background command's running time.
    #[serde(default = "default_failsafe_timeout_secs")]
    pub failsafe_timeout_secs: u64,
    /// Delay between the graceful termination signal and the forced kill.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// How long an interactive command is considered running before its
    /// completion is synthesized.
    #[serde(default = "default_interactive_settle_ms")]
    pub interactive_settle_ms: u64,
    /// Output lines buffered per command; later lines are still published
    /// as events but no longer stored.
    #[serde(default = "default_max_buffered_lines")]
    pub max_buffered_lines: usize,
    /// Bytes kept of any single output line; the tail of an overlong line
    /// is discarded and the command's output is flagged truncated.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            failsafe_timeout_secs: default_failsafe_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            interactive_settle_ms: default_interactive_settle_ms(),
            max_buffered_lines: default_max_buffered_lines(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_failsafe_timeout_secs() -> u64 {
    300
}

fn default_stop_grace_secs() -> u64 {
    5
}

fn default_interactive_settle_ms() -> u64 {
    1000
}

fn default_max_buffered_lines() -> usize {
    10_000
}

fn default_max_line_bytes() -> usize {
    16 * 1024
}

/// Risk tiers as ordered pattern lists, matched case-insensitively against
/// the trimmed command text. Dangerous is checked before moderate; first
/// match wins; no match means safe.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_dangerous_patterns")]
    pub dangerous: Vec<String>,
    #[serde(default = "default_moderate_patterns")]
    pub moderate: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            dangerous: default_dangerous_patterns(),
            moderate: default_moderate_patterns(),
        }
    }
}

fn default_dangerous_patterns() -> Vec<String> {
    to_strings(&[
        r"rm\s+-[a-z]*r[a-z]*f",
        r"rm\s+-[a-z]*f[a-z]*r",
        r"rm\s+(-r|--recursive)\s+(-f|--force)",
        r"rm\s+(-f|--force)\s+(-r|--recursive)",
        r"\bsudo\b",
        r"\bsu\s+(-|root)",
        r"\bdoas\b",
        r"chmod\s+(-[a-z]+\s+)*777",
        r"\b(shutdown|reboot|poweroff|halt)\b",
        r"\bdd\s+if=",
        r"\bmkfs(\.[a-z0-9]+)?\b",
        r">\s*/dev/(sd|hd|nvme|disk)",
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}",
        r"(curl|wget)\b[^|]*\|\s*(sudo\s+)?(ba|z|da|fi)?sh\b",
    ])
}

fn default_moderate_patterns() -> Vec<String> {
    to_strings(&[
        r"\brm\b",
        r"\brmdir\b",
        r"\bdel\b",
        r"git\s+push",
        r"git\s+reset",
        r"(npm|pnpm|yarn)\s+(install|i|add)\b",
        r"pip3?\s+install",
        r"cargo\s+(install|add)\b",
        r"apt(-get)?\s+install",
        r"brew\s+install",
        r"gem\s+install",
        r"go\s+install",
        r"\bchmod\b",
        r"\bchown\b",
        r"\bchgrp\b",
    ])
}

/// Display heuristics: the allow-list is checked first and wins; otherwise
/// single-effect file operations are hidden from interactive display.
#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityConfig {
    #[serde(default = "default_always_visible_patterns")]
    pub always_visible: Vec<String>,
    #[serde(default = "default_hidden_patterns")]
    pub hidden: Vec<String>,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            always_visible: default_always_visible_patterns(),
            hidden: default_hidden_patterns(),
        }
    }
}

fn default_always_visible_patterns() -> Vec<String> {
    to_strings(&[
        r"(npm|pnpm|yarn|npx|bun)\s+\S",
        r"cargo\s+\S",
        r"\bmake\b",
        r"go\s+(build|run|test|vet)\b",
        r"(mvn|gradlew?)\b",
        r"dotnet\s+\S",
        r"(python3?|node|deno)\s+\S",
        r"pip3?\s+\S",
        r"docker\s+(compose\s+)?(build|run|up)\b",
    ])
}

fn default_hidden_patterns() -> Vec<String> {
    to_strings(&[
        r"^touch\s",
        r"^mkdir\s",
        r"^(echo|printf)\b",
        r"^(cp|copy)\s",
        r"^(mv|move)\s",
        r"^(cat|less|head|tail|type)\s",
        r"^ls\b",
        r"^dir\b",
        r"^pwd\b",
        r"^rm\s+[^-]",
        r"^del\s",
        r"^md\s",
    ])
}

fn to_strings(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|pattern| pattern.to_string()).collect()
}
