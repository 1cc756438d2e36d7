//! Turns raw predicates and targets into a validated [`Rule`].

use crate::common::entity::{NetworkProtocol, TransportProtocol};
use crate::field::{Field, FieldKind, Layer, read_be};

use super::entity::{Condition, MatchPredicate, Rule, TargetAction, TargetKeyword};
use super::error::RuleError;
use super::option::{OptionStripList, TcpOptionValue};

#[derive(Default)]
struct Scope {
    l3: Option<NetworkProtocol>,
    l4: Option<TransportProtocol>,
}

impl Scope {
    fn note_layer(&mut self, layer: Layer) -> Result<(), RuleError> {
        if let Some(l3) = layer.network() {
            self.note_l3(l3)?;
        }
        if let Some(l4) = layer.transport() {
            match self.l4 {
                Some(seen) if seen != l4 => return Err(RuleError::MultipleL4),
                _ => self.l4 = Some(l4),
            }
        }
        Ok(())
    }

    fn note_l3(&mut self, l3: NetworkProtocol) -> Result<(), RuleError> {
        match self.l3 {
            Some(seen) if seen != l3 => Err(RuleError::MultipleL3),
            _ => {
                self.l3 = Some(l3);
                Ok(())
            }
        }
    }
}

pub(super) fn build(
    matches: Vec<MatchPredicate>,
    targets: Vec<TargetAction>,
) -> Result<Rule, RuleError> {
    let mut scope = Scope::default();
    let mut rule = Rule {
        matches: Vec::new(),
        targets: Vec::new(),
        l3: NetworkProtocol::default(),
        l4: None,
        in_interface: None,
        out_interface: None,
        has_tcp_options_in_match: false,
        has_tcp_options_in_target: false,
        option_strips: OptionStripList::new(),
        option_adds: Vec::new(),
        option_mods: Vec::new(),
    };

    validate_matches(&mut rule, &mut scope, matches)?;
    validate_targets(&mut rule, &mut scope, targets)?;

    rule.l3 = scope.l3.unwrap_or_default();
    rule.l4 = scope.l4;
    Ok(rule)
}

fn validate_matches(
    rule: &mut Rule,
    scope: &mut Scope,
    matches: Vec<MatchPredicate>,
) -> Result<(), RuleError> {
    if matches.iter().any(|m| m.field == Field::All) {
        let [only] = matches.as_slice() else {
            return Err(RuleError::AllNotAlone);
        };
        if !only.is_unary() || only.negated {
            return Err(RuleError::AllNotAlone);
        }
        return Ok(());
    }

    for mut m in matches {
        let spec = m.field.spec();
        scope.note_layer(spec.layer)?;

        if m.condition.is_none() && !m.value.is_empty() {
            m.condition = Some(Condition::Eq);
        }

        match spec.kind {
            FieldKind::Meta => validate_meta_match(rule, scope, &m)?,
            FieldKind::EcnAlias(code) => {
                if !m.is_unary() {
                    return Err(RuleError::UnexpectedValue { field: m.field });
                }
                rule.matches.push(MatchPredicate {
                    field: Field::IpEcn,
                    option_kind: None,
                    condition: Some(Condition::Eq),
                    negated: m.negated,
                    value: vec![code],
                });
            }
            FieldKind::Flag => {
                if m.is_unary() {
                    m.condition = Some(Condition::Eq);
                    m.value = vec![1];
                }
                rule.matches.push(m);
            }
            FieldKind::TcpOption(kind) => {
                let kind = kind.or(m.option_kind).ok_or(RuleError::MissingOptionKind)?;
                rule.has_tcp_options_in_match = true;
                m.field = Field::TcpOpt;
                m.option_kind = Some(kind);
                rule.matches.push(m);
            }
            FieldKind::Payload => {
                if m.is_unary() {
                    if m.negated {
                        return Err(RuleError::UnsatisfiableUnary { field: m.field });
                    }
                    continue;
                }
                if m.condition.is_some_and(|c| !c.is_equality()) {
                    return Err(RuleError::OrderedPayload { field: m.field });
                }
                if m.value.is_empty() {
                    return Err(RuleError::MissingValue { field: m.field });
                }
                rule.matches.push(m);
            }
            FieldKind::Scalar | FieldKind::Address => {
                if m.is_unary() {
                    // A bare header field only scopes the protocol.
                    if m.negated {
                        return Err(RuleError::UnsatisfiableUnary { field: m.field });
                    }
                    continue;
                }
                if m.value.is_empty() {
                    return Err(RuleError::MissingValue { field: m.field });
                }
                if spec.kind == FieldKind::Address {
                    let prefix = m.value[m.value.len() - 1];
                    if usize::from(prefix) > usize::from(spec.span) * 8 {
                        return Err(RuleError::InvalidValue {
                            field: m.field,
                            reason: "prefix length exceeds address width",
                        });
                    }
                }
                rule.matches.push(m);
            }
        }
    }
    Ok(())
}

fn validate_meta_match(
    rule: &mut Rule,
    scope: &mut Scope,
    m: &MatchPredicate,
) -> Result<(), RuleError> {
    match m.field {
        Field::In | Field::Out => {
            if m.condition != Some(Condition::Eq) || m.negated {
                return Err(RuleError::InvalidInterfaceMatch { field: m.field });
            }
            if m.value.len() != 4 {
                return Err(RuleError::MissingValue { field: m.field });
            }
            let iface = u32::from_be_bytes([m.value[0], m.value[1], m.value[2], m.value[3]]);
            let slot = if m.field == Field::In {
                &mut rule.in_interface
            } else {
                &mut rule.out_interface
            };
            if slot.is_some() {
                return Err(RuleError::MultipleInterfaces { field: m.field });
            }
            *slot = Some(iface);
            Ok(())
        }
        Field::NetProto => {
            if m.condition != Some(Condition::Eq) || m.negated {
                return Err(RuleError::InvalidValue {
                    field: m.field,
                    reason: "net-proto must be compared with '=='",
                });
            }
            let ethertype = u16::try_from(read_be(&m.value)).unwrap_or(0);
            let l3 = NetworkProtocol::from_ethertype(ethertype).ok_or(RuleError::InvalidValue {
                field: m.field,
                reason: "expected ip4 or ip6",
            })?;
            scope.note_l3(l3)
        }
        _ => Err(RuleError::AllNotAlone),
    }
}

fn validate_targets(
    rule: &mut Rule,
    scope: &mut Scope,
    targets: Vec<TargetAction>,
) -> Result<(), RuleError> {
    for mut t in targets {
        let spec = t.field.spec();

        if t.keyword == TargetKeyword::Drop {
            if t.negated {
                return Err(RuleError::NegatedDrop);
            }
            rule.targets.push(t);
            continue;
        }

        scope.note_layer(spec.layer)?;

        match t.field {
            Field::All => {
                if t.keyword != TargetKeyword::Strip || !t.value.is_empty() {
                    return Err(RuleError::AllInTarget);
                }
                if t.negated {
                    return Err(RuleError::NegatedStripAll);
                }
            }
            Field::In | Field::Out | Field::NetProto => {
                return Err(RuleError::InvalidTargetField { field: t.field });
            }
            _ => {}
        }

        match t.keyword {
            TargetKeyword::Strip => {
                let kind = match spec.kind {
                    FieldKind::TcpOption(kind) => {
                        Some(kind.or(t.option_kind).ok_or(RuleError::MissingOptionKind)?)
                    }
                    _ if t.field == Field::All => None,
                    _ => return Err(RuleError::StripRequiresOption),
                };
                if !rule.option_strips.record(kind, t.negated) {
                    return Err(RuleError::InconsistentStripPolarity);
                }
                rule.has_tcp_options_in_target = true;
                scope.note_layer(Layer::Tcp)?;
            }
            TargetKeyword::Add => {
                let FieldKind::TcpOption(kind) = spec.kind else {
                    return Err(RuleError::AddRequiresOption);
                };
                let kind = kind.or(t.option_kind).ok_or(RuleError::MissingOptionKind)?;
                if t.value.is_empty() && !(spec.fixed && spec.len == 0) {
                    return Err(RuleError::MissingValue { field: t.field });
                }
                rule.option_adds.push(TcpOptionValue {
                    kind,
                    value: t.value,
                });
                rule.has_tcp_options_in_target = true;
            }
            TargetKeyword::Modify => match spec.kind {
                FieldKind::TcpOption(kind) => {
                    let kind = kind.or(t.option_kind).ok_or(RuleError::MissingOptionKind)?;
                    t.field = Field::TcpOpt;
                    t.option_kind = Some(kind);
                    rule.option_mods.push(t);
                    rule.has_tcp_options_in_target = true;
                }
                FieldKind::EcnAlias(code) => {
                    if !t.value.is_empty() {
                        return Err(RuleError::UnexpectedValue { field: t.field });
                    }
                    rule.targets.push(TargetAction::modify(Field::IpEcn, &[code]));
                }
                FieldKind::Meta | FieldKind::Payload => {
                    return Err(RuleError::NotModifiable { field: t.field });
                }
                FieldKind::Scalar | FieldKind::Flag | FieldKind::Address => {
                    if t.negated {
                        return Err(RuleError::NotModifiable { field: t.field });
                    }
                    if t.value.is_empty() {
                        return Err(RuleError::MissingValue { field: t.field });
                    }
                    rule.targets.push(t);
                }
            },
            TargetKeyword::Drop => {}
        }
    }
    Ok(())
}
