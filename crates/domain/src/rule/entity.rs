use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::entity::{NetworkProtocol, TransportProtocol};
use crate::field::{Field, FieldKind, normalize_operand, read_be};

use super::error::RuleError;
use super::option::{OptionStripList, TcpOptionValue};
use super::validate;

// ── Conditions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Gt => ">",
        }
    }

    /// Apply the comparison `lhs <op> rhs` on unsigned values.
    pub fn holds(self, lhs: u128, rhs: u128) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Le => lhs <= rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Gt => lhs > rhs,
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            other => Err(format!("unknown condition: {other}")),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Match predicates ────────────────────────────────────────────────

/// One AND-combined test of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPredicate {
    pub field: Field,
    pub option_kind: Option<u8>,
    pub condition: Option<Condition>,
    pub negated: bool,
    /// Operand, normalised to the field width.
    pub value: Vec<u8>,
}

impl MatchPredicate {
    pub fn compare(field: Field, condition: Condition, value: &[u8]) -> Self {
        Self {
            field,
            option_kind: None,
            condition: Some(condition),
            negated: false,
            value: normalize_operand(value, usize::from(field.spec().len)),
        }
    }

    /// Field named without condition or operand.
    pub fn unary(field: Field) -> Self {
        Self {
            field,
            option_kind: None,
            condition: None,
            negated: false,
            value: Vec::new(),
        }
    }

    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    #[must_use]
    pub fn with_option_kind(mut self, kind: u8) -> Self {
        self.option_kind = Some(kind);
        self
    }

    pub fn is_unary(&self) -> bool {
        self.condition.is_none() && self.value.is_empty()
    }
}

impl fmt::Display for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        write_field(f, self.field, self.option_kind)?;
        if let Some(cond) = self.condition {
            write!(f, " {cond}")?;
        }
        if !self.value.is_empty() {
            write!(f, " {}", format_value(self.field, &self.value))?;
        }
        Ok(())
    }
}

// ── Target actions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKeyword {
    Drop,
    Modify,
    Strip,
    Add,
}

impl TargetKeyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Modify => "modify",
            Self::Strip => "strip",
            Self::Add => "add",
        }
    }
}

impl FromStr for TargetKeyword {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop" => Ok(Self::Drop),
            "modify" => Ok(Self::Modify),
            "strip" => Ok(Self::Strip),
            "add" => Ok(Self::Add),
            other => Err(format!("unknown target keyword: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAction {
    pub field: Field,
    pub option_kind: Option<u8>,
    pub keyword: TargetKeyword,
    pub negated: bool,
    pub value: Vec<u8>,
}

impl TargetAction {
    pub fn drop() -> Self {
        Self::with_keyword(TargetKeyword::Drop, Field::All, &[])
    }

    pub fn modify(field: Field, value: &[u8]) -> Self {
        Self::with_keyword(TargetKeyword::Modify, field, value)
    }

    pub fn strip(field: Field) -> Self {
        Self::with_keyword(TargetKeyword::Strip, field, &[])
    }

    pub fn add(field: Field, value: &[u8]) -> Self {
        Self::with_keyword(TargetKeyword::Add, field, value)
    }

    fn with_keyword(keyword: TargetKeyword, field: Field, value: &[u8]) -> Self {
        Self {
            field,
            option_kind: None,
            keyword,
            negated: false,
            value: normalize_operand(value, usize::from(field.spec().len)),
        }
    }

    #[must_use]
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    #[must_use]
    pub fn with_option_kind(mut self, kind: u8) -> Self {
        self.option_kind = Some(kind);
        self
    }
}

impl fmt::Display for TargetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str(self.keyword.as_str())?;
        if self.keyword != TargetKeyword::Drop {
            f.write_str(" ")?;
            write_field(f, self.field, self.option_kind)?;
        }
        if !self.value.is_empty() {
            write!(f, " {}", format_value(self.field, &self.value))?;
        }
        Ok(())
    }
}

// ── Rule ────────────────────────────────────────────────────────────

/// A validated rule: AND-combined predicates, ordered targets and the
/// derived protocol scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub matches: Vec<MatchPredicate>,
    pub targets: Vec<TargetAction>,
    pub l3: NetworkProtocol,
    /// `None` means any supported transport.
    pub l4: Option<TransportProtocol>,
    pub in_interface: Option<u32>,
    pub out_interface: Option<u32>,
    pub has_tcp_options_in_match: bool,
    pub has_tcp_options_in_target: bool,
    pub option_strips: OptionStripList,
    pub option_adds: Vec<TcpOptionValue>,
    pub option_mods: Vec<TargetAction>,
}

impl Rule {
    /// Validate raw predicates and targets and derive the protocol scope.
    pub fn new(
        matches: Vec<MatchPredicate>,
        targets: Vec<TargetAction>,
    ) -> Result<Self, RuleError> {
        validate::build(matches, targets)
    }

    pub fn is_drop(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.keyword == TargetKeyword::Drop)
    }

    /// Whether any target writes a header field.
    pub fn needs_rewrite(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.keyword == TargetKeyword::Modify)
    }

    pub fn uses_tcp_options(&self) -> bool {
        self.has_tcp_options_in_match || self.has_tcp_options_in_target
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.l3)?;
        match self.l4 {
            Some(l4) => write!(f, " {l4}")?,
            None => f.write_str(" any")?,
        }
        if let Some(iface) = self.in_interface {
            write!(f, " in {iface}")?;
        }
        if let Some(iface) = self.out_interface {
            write!(f, " out {iface}")?;
        }
        if self.matches.is_empty() {
            f.write_str(" all")?;
        } else {
            let matches: Vec<String> = self.matches.iter().map(ToString::to_string).collect();
            write!(f, " {}", matches.join(" AND "))?;
        }
        let mut targets: Vec<String> = self.targets.iter().map(ToString::to_string).collect();
        targets.extend(self.option_mods.iter().map(ToString::to_string));
        targets.extend(self.option_adds.iter().map(|o| {
            format!("add tcp-opt {} 0x{}", o.kind, to_hex(&o.value))
        }));
        if self.option_strips.is_active() {
            targets.push(self.option_strips.to_string());
        }
        write!(f, " -> {}", targets.join(", "))
    }
}

// ── Formatting helpers ──────────────────────────────────────────────

fn write_field(f: &mut fmt::Formatter<'_>, field: Field, kind: Option<u8>) -> fmt::Result {
    match (field, kind) {
        (Field::TcpOpt, Some(kind)) => match Field::for_option_kind(kind) {
            Field::TcpOpt => write!(f, "tcp-opt {kind}"),
            named => write!(f, "{named}"),
        },
        _ => write!(f, "{field}"),
    }
}

fn to_hex(value: &[u8]) -> String {
    value.iter().map(|b| format!("{b:02x}")).collect()
}

fn format_value(field: Field, value: &[u8]) -> String {
    let spec = field.spec();
    match spec.kind {
        FieldKind::Address if value.len() == 5 => {
            let addr = Ipv4Addr::new(value[0], value[1], value[2], value[3]);
            format!("{addr}/{}", value[4])
        }
        FieldKind::Address if value.len() == 17 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[..16]);
            format!("{}/{}", Ipv6Addr::from(octets), value[16])
        }
        FieldKind::Scalar | FieldKind::Flag | FieldKind::Meta if value.len() <= 16 => {
            read_be(value).to_string()
        }
        _ => format!("0x{}", to_hex(value)),
    }
}
