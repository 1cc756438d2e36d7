//! Rule configuration structs and conversion to domain rules.

use domain::field::{Field, FieldKind};
use domain::rule::{Condition, MatchPredicate, Rule, TargetAction};
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, parse_text_value};

// ── Rule config (YAML-friendly) ────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub matches: Vec<MatchConfig>,

    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchConfig {
    pub field: String,

    /// `==`, `!=`, `<=`, `>=`, `<` or `>`. Defaults to `==` when a value
    /// is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueConfig>,

    /// Option kind for `tcp-opt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,

    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// `drop`, `modify`, `strip` or `add`.
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,

    #[serde(default)]
    pub negate: bool,
}

/// Operand as written in YAML: a bare integer or a string (hex, decimal,
/// address/prefix, protocol keyword, payload text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueConfig {
    Int(u64),
    Text(String),
}

impl ValueConfig {
    fn to_bytes(&self, field: Field, at: &str) -> Result<Vec<u8>, ConfigError> {
        match self {
            Self::Int(n) => {
                if field.spec().kind == FieldKind::Address {
                    return Err(ConfigError::InvalidValue {
                        field: at.to_string(),
                        value: n.to_string(),
                        expected: "an address with optional /prefix".to_string(),
                    });
                }
                if field.spec().kind == FieldKind::Payload {
                    // unquoted digits are payload text too
                    return Ok(n.to_string().into_bytes());
                }
                Ok(n.to_be_bytes().to_vec())
            }
            Self::Text(s) => parse_text_value(field, s).map_err(|reason| {
                ConfigError::InvalidValue {
                    field: at.to_string(),
                    value: s.clone(),
                    expected: reason,
                }
            }),
        }
    }
}

fn parse_field(name: &str, at: &str) -> Result<Field, ConfigError> {
    name.parse::<Field>().map_err(|_| ConfigError::InvalidValue {
        field: at.to_string(),
        value: name.to_string(),
        expected: "a known field name".to_string(),
    })
}

impl MatchConfig {
    fn to_predicate(&self, at: &str) -> Result<MatchPredicate, ConfigError> {
        let field = parse_field(&self.field, &format!("{at}.field"))?;
        let condition = self
            .condition
            .as_deref()
            .map(str::parse::<Condition>)
            .transpose()
            .map_err(|_| ConfigError::InvalidValue {
                field: format!("{at}.condition"),
                value: self.condition.clone().unwrap_or_default(),
                expected: "==, !=, <=, >=, <, >".to_string(),
            })?;

        let mut predicate = match (&self.value, condition) {
            (Some(value), condition) => {
                let bytes = value.to_bytes(field, &format!("{at}.value"))?;
                MatchPredicate::compare(field, condition.unwrap_or(Condition::Eq), &bytes)
            }
            (None, None) => MatchPredicate::unary(field),
            (None, Some(_)) => {
                return Err(ConfigError::Validation {
                    field: format!("{at}.value"),
                    message: "a condition requires a value".to_string(),
                });
            }
        };
        if let Some(kind) = self.kind {
            predicate = predicate.with_option_kind(kind);
        }
        if self.negate {
            predicate = predicate.negate();
        }
        Ok(predicate)
    }
}

impl TargetConfig {
    fn to_action(&self, at: &str) -> Result<TargetAction, ConfigError> {
        if self.action == "drop" {
            let action = TargetAction::drop();
            return Ok(if self.negate { action.negate() } else { action });
        }

        let Some(name) = self.field.as_deref() else {
            return Err(ConfigError::Validation {
                field: format!("{at}.field"),
                message: format!("'{}' requires a field", self.action),
            });
        };
        let field = parse_field(name, &format!("{at}.field"))?;
        let value = self
            .value
            .as_ref()
            .map(|v| v.to_bytes(field, &format!("{at}.value")))
            .transpose()?
            .unwrap_or_default();

        let mut action = match self.action.as_str() {
            "modify" => TargetAction::modify(field, &value),
            "strip" => TargetAction::strip(field),
            "add" => TargetAction::add(field, &value),
            other => {
                return Err(ConfigError::InvalidValue {
                    field: format!("{at}.action"),
                    value: other.to_string(),
                    expected: "drop, modify, strip, add".to_string(),
                });
            }
        };
        if let Some(kind) = self.kind {
            action = action.with_option_kind(kind);
        }
        if self.negate {
            action = action.negate();
        }
        Ok(action)
    }
}

impl RuleConfig {
    /// Convert to a validated domain `Rule`.
    pub fn to_domain_rule(&self, idx: usize) -> Result<Rule, ConfigError> {
        let prefix = format!("rules[{idx}]");
        let matches = self
            .matches
            .iter()
            .enumerate()
            .map(|(i, m)| m.to_predicate(&format!("{prefix}.matches[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        let targets = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, t)| t.to_action(&format!("{prefix}.targets[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Rule::new(matches, targets).map_err(|e| ConfigError::Validation {
            field: prefix,
            message: e.to_string(),
        })
    }
}
