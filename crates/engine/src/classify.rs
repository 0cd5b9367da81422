use crate::command::RiskLevel;
use crate::config::{RiskConfig, VisibilityConfig};
use crate::error::EngineError;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// What a submission would be tagged with, computable without running
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub risk_level: RiskLevel,
    pub hidden: bool,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, EngineError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| EngineError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Tiers commands by the damage they could do. Purely advisory: the engine
/// records the tier on the command but never refuses to run anything.
#[derive(Debug)]
pub(crate) struct RiskClassifier {
    dangerous: Vec<Regex>,
    moderate: Vec<Regex>,
}

impl RiskClassifier {
    pub(crate) fn from_config(config: &RiskConfig) -> Result<Self, EngineError> {
        Ok(Self {
            dangerous: compile(&config.dangerous)?,
            moderate: compile(&config.moderate)?,
        })
    }

    pub(crate) fn classify(&self, command_line: &str) -> RiskLevel {
        let trimmed = command_line.trim();
        if self.dangerous.iter().any(|regex| regex.is_match(trimmed)) {
            return RiskLevel::Dangerous;
        }
        if self.moderate.iter().any(|regex| regex.is_match(trimmed)) {
            return RiskLevel::Moderate;
        }
        RiskLevel::Safe
    }
}

/// Decides whether a command is worth showing in an interactive surface.
/// Risk and visibility are independent axes: a hidden command can still be
/// moderate or dangerous, and runs either way.
#[derive(Debug)]
pub(crate) struct VisibilityPolicy {
    always_visible: Vec<Regex>,
    hidden: Vec<Regex>,
}

impl VisibilityPolicy {
    pub(crate) fn from_config(config: &VisibilityConfig) -> Result<Self, EngineError> {
        Ok(Self {
            always_visible: compile(&config.always_visible)?,
            hidden: compile(&config.hidden)?,
        })
    }

    pub(crate) fn is_hidden(&self, command_line: &str) -> bool {
        let trimmed = command_line.trim();
        if self
            .always_visible
            .iter()
            .any(|regex| regex.is_match(trimmed))
        {
            return false;
        }
        self.hidden.iter().any(|regex| regex.is_match(trimmed))
    }
}
