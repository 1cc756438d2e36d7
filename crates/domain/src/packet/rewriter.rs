//! In-place application of a matched rule's targets.

use serde::{Deserialize, Serialize};

use crate::field::{Field, FieldKind, FieldSpec, prefix_mask, read_be, write_be};
use crate::rule::{Rule, TargetAction, TargetKeyword};

use super::checksum::{update_ipv4_checksum, update_transport_checksum};
use super::view::PacketLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Forward,
    Drop,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Drop => "drop",
        }
    }
}

/// Which checksums the applied writes invalidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Touched {
    pub network: bool,
    pub transport: bool,
}

/// Apply `rule`'s targets to `packet`. Drop short-circuits before any
/// write. Header writes are followed by checksum recomputation.
pub fn apply(packet: &mut [u8], rule: &Rule) -> Verdict {
    if rule.is_drop() {
        return Verdict::Drop;
    }
    let Some(layout) = PacketLayout::parse(packet) else {
        return Verdict::Forward;
    };
    let touched = write_targets(packet, &layout, &rule.targets);
    // Option strip/add/modify lists are carried on the rule but not
    // executed here; they would run between the header writes and the
    // checksum pass.
    finalize_checksums(packet, &layout, touched);
    Verdict::Forward
}

/// Write every `modify` target whose field exists in this packet.
pub fn write_targets(packet: &mut [u8], layout: &PacketLayout, targets: &[TargetAction]) -> Touched {
    let mut touched = Touched::default();
    for target in targets
        .iter()
        .filter(|t| t.keyword == TargetKeyword::Modify)
    {
        let spec = target.field.spec();
        if write_field(packet, layout, spec, &target.value) {
            touched.network = true;
            if spec.layer.transport().is_some() || is_pseudo_header(target.field) {
                touched.transport = true;
            }
        }
    }
    touched
}

/// Fields covered by the transport pseudo-header.
fn is_pseudo_header(field: Field) -> bool {
    matches!(
        field,
        Field::IpSaddr
            | Field::IpDaddr
            | Field::IpProto
            | Field::IpLen
            | Field::Ip6Saddr
            | Field::Ip6Daddr
            | Field::Ip6Next
            | Field::Ip6Len
    )
}

fn write_field(packet: &mut [u8], layout: &PacketLayout, spec: &FieldSpec, value: &[u8]) -> bool {
    if value.is_empty() {
        return false;
    }
    let Some(range) = layout.field_range(spec) else {
        return false;
    };
    let Some(bytes) = packet.get_mut(range) else {
        return false;
    };
    let current = read_be(bytes);
    let updated = match spec.kind {
        FieldKind::Address => {
            let Some((prefix, addr)) = value.split_last() else {
                return false;
            };
            let mask = prefix_mask(usize::from(spec.span), *prefix);
            (current & !mask) | (read_be(addr) & mask)
        }
        _ => (current & !spec.mask) | ((read_be(value) << spec.shift) & spec.mask),
    };
    write_be(bytes, updated);
    true
}

/// Recompute the transport checksum if needed, then the IPv4 header
/// checksum last, unconditionally.
pub fn finalize_checksums(packet: &mut [u8], before: &PacketLayout, touched: Touched) {
    let layout = PacketLayout::parse(packet).unwrap_or(*before);
    if touched.transport {
        update_transport_checksum(packet, &layout);
    }
    update_ipv4_checksum(packet, &layout);
}
