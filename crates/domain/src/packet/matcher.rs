//! First-match rule evaluation over raw packet bytes.

use crate::field::{FieldKind, FieldSpec, prefix_mask, read_be};
use crate::rule::{Condition, MatchPredicate, Rule};

use super::view::PacketLayout;

/// Whether `rule` is eligible for the packet and all its predicates hold.
pub fn rule_matches(
    rule: &Rule,
    packet: &[u8],
    layout: &PacketLayout,
    ingress: Option<u32>,
) -> bool {
    if rule.l3 != layout.l3 {
        return false;
    }
    let Some(l4) = layout.l4 else {
        return false;
    };
    if rule.l4.is_some_and(|r| r != l4) {
        return false;
    }
    if let Some(iface) = rule.in_interface
        && ingress != Some(iface)
    {
        return false;
    }
    rule.matches
        .iter()
        .all(|p| predicate_holds(p, packet, layout))
}

/// Index of the first matching rule.
pub fn first_match<'a, I>(
    rules: I,
    packet: &[u8],
    layout: &PacketLayout,
    ingress: Option<u32>,
) -> Option<usize>
where
    I: IntoIterator<Item = &'a Rule>,
{
    rules
        .into_iter()
        .position(|r| rule_matches(r, packet, layout, ingress))
}

/// A predicate that cannot be evaluated (field absent from this packet)
/// never holds, regardless of negation.
fn predicate_holds(p: &MatchPredicate, packet: &[u8], layout: &PacketLayout) -> bool {
    let spec = p.field.spec();
    let outcome = match spec.kind {
        FieldKind::TcpOption(_) => option_holds(p, packet, layout),
        FieldKind::Payload => payload_holds(p, spec, packet, layout),
        FieldKind::Address => address_holds(p, spec, packet, layout),
        FieldKind::Scalar | FieldKind::Flag | FieldKind::EcnAlias(_) => {
            scalar_holds(p, spec, packet, layout)
        }
        FieldKind::Meta => None,
    };
    outcome.is_some_and(|hit| hit != p.negated)
}

fn condition(p: &MatchPredicate) -> Condition {
    p.condition.unwrap_or(Condition::Eq)
}

fn read_span(spec: &FieldSpec, packet: &[u8], layout: &PacketLayout) -> Option<u128> {
    let range = layout.field_range(spec)?;
    packet.get(range).map(read_be)
}

fn scalar_holds(
    p: &MatchPredicate,
    spec: &FieldSpec,
    packet: &[u8],
    layout: &PacketLayout,
) -> Option<bool> {
    let raw = read_span(spec, packet, layout)?;
    let actual = (raw & spec.mask) >> spec.shift;
    Some(condition(p).holds(actual, read_be(&p.value)))
}

fn address_holds(
    p: &MatchPredicate,
    spec: &FieldSpec,
    packet: &[u8],
    layout: &PacketLayout,
) -> Option<bool> {
    let raw = read_span(spec, packet, layout)?;
    let (prefix, addr) = p.value.split_last()?;
    let mask = prefix_mask(usize::from(spec.span), *prefix);
    Some(condition(p).holds(raw & mask, read_be(addr) & mask))
}

fn payload_holds(
    p: &MatchPredicate,
    spec: &FieldSpec,
    packet: &[u8],
    layout: &PacketLayout,
) -> Option<bool> {
    let range = layout.payload_range(spec.layer, packet)?;
    let payload = packet.get(range)?;
    let prefix = payload.starts_with(&p.value);
    match condition(p) {
        Condition::Eq => Some(prefix),
        Condition::Ne => Some(!prefix),
        _ => None,
    }
}

fn option_holds(p: &MatchPredicate, packet: &[u8], layout: &PacketLayout) -> Option<bool> {
    let kind = p.option_kind?;
    layout.transport_len(packet)?;
    let found = layout.tcp_options(packet).find(|(k, _)| *k == kind);
    if p.is_unary() {
        return Some(found.is_some());
    }
    let Some((_, data)) = found else {
        return Some(false);
    };
    let cond = condition(p);
    if data.len() <= 16 && p.value.len() <= 16 {
        return Some(cond.holds(read_be(data), read_be(&p.value)));
    }
    match cond {
        Condition::Eq => Some(data == p.value.as_slice()),
        Condition::Ne => Some(data != p.value.as_slice()),
        _ => None,
    }
}
