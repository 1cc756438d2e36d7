//! Agent configuration: structs, parsing, and validation.
//!
//! The config module is split across sub-modules:
//! - `common`: shared helpers, limits and `ConfigError`
//! - `rule`: YAML rule definitions and their conversion to domain rules

mod common;
mod rule;

// ── Public re-exports ─────────────────────────────────────────────

pub use common::{ConfigError, parse_prefix, parse_text_value};
pub use rule::{MatchConfig, RuleConfig, TargetConfig, ValueConfig};

use std::collections::HashSet;
use std::path::Path;

use domain::rule::Rule;
use domain::table::{ChainSettings, EmptyTablePolicy};
use serde::{Deserialize, Serialize};

use common::{MAX_INTERFACES, MAX_RULES, check_limit};

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl AgentConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_limit("agent.interfaces", self.agent.interfaces.len(), MAX_INTERFACES)?;
        let mut seen = HashSet::new();
        for iface in &self.agent.interfaces {
            if !seen.insert(iface) {
                return Err(ConfigError::Validation {
                    field: "agent.interfaces".to_string(),
                    message: format!("interface {iface} listed twice"),
                });
            }
        }

        if self.engine.initial_table_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "engine.initial_table_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.engine.table_growth_ratio < 2 {
            return Err(ConfigError::Validation {
                field: "engine.table_growth_ratio".to_string(),
                message: format!("{} must be at least 2", self.engine.table_growth_ratio),
            });
        }

        check_limit("rules", self.rules.len(), MAX_RULES)?;
        for (idx, rule) in self.rules.iter().enumerate() {
            rule.to_domain_rule(idx)?;
        }
        Ok(())
    }

    /// Convert the configured rules into domain rules, in file order.
    pub fn domain_rules(&self) -> Result<Vec<Rule>, ConfigError> {
        self.rules
            .iter()
            .enumerate()
            .map(|(idx, r)| r.to_domain_rule(idx))
            .collect()
    }

    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            initial_capacity: self.engine.initial_table_capacity,
            growth_ratio: self.engine.table_growth_ratio,
            empty_table_policy: self.engine.empty_table_policy,
        }
    }
}

// ── Agent info ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentInfo {
    /// Interface ids the engine is enabled on.
    #[serde(default)]
    pub interfaces: Vec<u32>,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}

// ── Engine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_table_capacity: u32,

    #[serde(default = "default_growth_ratio")]
    pub table_growth_ratio: u32,

    #[serde(default)]
    pub empty_table_policy: EmptyTablePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let settings = ChainSettings::default();
        Self {
            initial_table_capacity: settings.initial_capacity,
            table_growth_ratio: settings.growth_ratio,
            empty_table_policy: settings.empty_table_policy,
        }
    }
}

fn default_initial_capacity() -> u32 {
    ChainSettings::default().initial_capacity
}
fn default_growth_ratio() -> u32 {
    ChainSettings::default().growth_ratio
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}
