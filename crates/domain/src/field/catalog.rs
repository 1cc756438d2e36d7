//! Static description of every matchable and rewritable header field.
//!
//! Each entry says where the field lives (layer, byte offset, byte span)
//! and which bits of that span it owns (mask, shift). The compiler, the
//! matcher and the rewriter all read from this one table.

use std::str::FromStr;

use crate::common::entity::{NetworkProtocol, TransportProtocol};

/// Header a field belongs to. `Meta` fields are not packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Meta,
    Ip4,
    Ip6,
    Icmp,
    Udp,
    Tcp,
}

impl Layer {
    pub fn network(self) -> Option<NetworkProtocol> {
        match self {
            Self::Ip4 => Some(NetworkProtocol::Ip4),
            Self::Ip6 => Some(NetworkProtocol::Ip6),
            _ => None,
        }
    }

    pub fn transport(self) -> Option<TransportProtocol> {
        match self {
            Self::Icmp => Some(TransportProtocol::Icmp),
            Self::Udp => Some(TransportProtocol::Udp),
            Self::Tcp => Some(TransportProtocol::Tcp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Interface ids, ethertype and the `all` wildcard.
    Meta,
    /// Plain integer occupying `mask` bits of the span.
    Scalar,
    /// Single bit; unary use means "bit set".
    Flag,
    /// ECN codepoint alias carrying its own value.
    EcnAlias(u8),
    /// Address followed by a prefix-length byte in the operand.
    Address,
    /// Variable-length layer payload.
    Payload,
    /// TCP option; `None` for the generic `tcp-opt` entry.
    TcpOption(Option<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    In,
    Out,
    NetProto,
    IpVer,
    IpIhl,
    IpDscp,
    IpEcn,
    IpNonEct,
    IpEct0,
    IpEct1,
    IpCe,
    IpLen,
    IpId,
    IpFlags,
    IpRes,
    IpDf,
    IpMf,
    IpFragOffset,
    IpTtl,
    IpProto,
    IpChecksum,
    IpSaddr,
    IpDaddr,
    IpPayload,
    Ip6Ver,
    Ip6TrafficClass,
    Ip6FlowLabel,
    Ip6Len,
    Ip6Next,
    Ip6HopLimit,
    Ip6Saddr,
    Ip6Daddr,
    Ip6Payload,
    IcmpType,
    IcmpCode,
    IcmpChecksum,
    IcmpPayload,
    UdpSport,
    UdpDport,
    UdpLen,
    UdpChecksum,
    UdpPayload,
    TcpSport,
    TcpDport,
    TcpSeqNum,
    TcpAckNum,
    TcpOffset,
    TcpReserved,
    TcpUrgPtr,
    TcpCwr,
    TcpEce,
    TcpUrg,
    TcpAck,
    TcpPush,
    TcpRst,
    TcpSyn,
    TcpFin,
    TcpFlags,
    TcpWin,
    TcpChecksum,
    TcpPayload,
    TcpOptMss,
    TcpOptWscale,
    TcpOptSackp,
    TcpOptSack,
    TcpOptTimestamp,
    TcpOptFastOpen,
    TcpOptMptcp,
    TcpOpt,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub name: &'static str,
    /// Operand width in bytes; 0 means variable.
    pub len: u8,
    /// The operand must be exactly `len` bytes.
    pub fixed: bool,
    pub layer: Layer,
    pub kind: FieldKind,
    /// Byte offset of the span from the start of its header.
    pub offset: u8,
    /// Header bytes the field reads or writes; 0 when not a header slice.
    pub span: u8,
    /// Bits of the span owned by the field, right-aligned to the span.
    pub mask: u128,
    pub shift: u8,
}

impl FieldSpec {
    /// Whether the field maps onto a fixed slice of a packet header.
    pub fn is_header(&self) -> bool {
        self.span > 0
    }

    /// Maximum operand value once shifted into place.
    pub fn value_mask(&self) -> u128 {
        self.mask >> self.shift
    }
}

const fn span_ones(span: u8) -> u128 {
    if span >= 16 {
        u128::MAX
    } else {
        (1u128 << (span as u32 * 8)) - 1
    }
}

const fn meta(field: Field, name: &'static str, len: u8) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len,
        fixed: true,
        layer: Layer::Meta,
        kind: FieldKind::Meta,
        offset: 0,
        span: 0,
        mask: 0,
        shift: 0,
    }
}

const fn whole(field: Field, name: &'static str, layer: Layer, offset: u8, span: u8) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len: span,
        fixed: true,
        layer,
        kind: FieldKind::Scalar,
        offset,
        span,
        mask: span_ones(span),
        shift: 0,
    }
}

#[allow(clippy::too_many_arguments)]
const fn bits(
    field: Field,
    name: &'static str,
    len: u8,
    layer: Layer,
    offset: u8,
    span: u8,
    mask: u128,
    shift: u8,
) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len,
        fixed: true,
        layer,
        kind: FieldKind::Scalar,
        offset,
        span,
        mask,
        shift,
    }
}

const fn flag(
    field: Field,
    name: &'static str,
    layer: Layer,
    offset: u8,
    span: u8,
    shift: u8,
) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len: 1,
        fixed: true,
        layer,
        kind: FieldKind::Flag,
        offset,
        span,
        mask: 1u128 << shift,
        shift,
    }
}

const fn ecn(field: Field, name: &'static str, code: u8) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len: 1,
        fixed: true,
        layer: Layer::Ip4,
        kind: FieldKind::EcnAlias(code),
        offset: 1,
        span: 1,
        mask: 0x03,
        shift: 0,
    }
}

const fn address(field: Field, name: &'static str, layer: Layer, offset: u8, span: u8) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len: span + 1,
        fixed: true,
        layer,
        kind: FieldKind::Address,
        offset,
        span,
        mask: span_ones(span),
        shift: 0,
    }
}

const fn payload(field: Field, name: &'static str, layer: Layer) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len: 0,
        fixed: false,
        layer,
        kind: FieldKind::Payload,
        offset: 0,
        span: 0,
        mask: 0,
        shift: 0,
    }
}

const fn option(field: Field, name: &'static str, kind: Option<u8>, len: u8, fixed: bool) -> FieldSpec {
    FieldSpec {
        field,
        name,
        len,
        fixed,
        layer: Layer::Tcp,
        kind: FieldKind::TcpOption(kind),
        offset: 0,
        span: 0,
        mask: 0,
        shift: 0,
    }
}

use Layer::{Icmp, Ip4, Ip6, Tcp, Udp};

/// Indexed by `Field as usize`.
pub static CATALOG: [FieldSpec; 70] = [
    meta(Field::In, "in", 4),
    meta(Field::Out, "out", 4),
    meta(Field::NetProto, "net-proto", 2),
    bits(Field::IpVer, "ip-ver", 1, Ip4, 0, 1, 0xF0, 4),
    bits(Field::IpIhl, "ip-ihl", 1, Ip4, 0, 1, 0x0F, 0),
    bits(Field::IpDscp, "ip-dscp", 1, Ip4, 1, 1, 0xFC, 2),
    bits(Field::IpEcn, "ip-ecn", 1, Ip4, 1, 1, 0x03, 0),
    ecn(Field::IpNonEct, "ip-non-ect", 0),
    ecn(Field::IpEct0, "ip-ect0", 2),
    ecn(Field::IpEct1, "ip-ect1", 1),
    ecn(Field::IpCe, "ip-ce", 3),
    whole(Field::IpLen, "ip-len", Ip4, 2, 2),
    whole(Field::IpId, "ip-id", Ip4, 4, 2),
    bits(Field::IpFlags, "ip-flags", 1, Ip4, 6, 2, 0xE000, 13),
    flag(Field::IpRes, "ip-res", Ip4, 6, 2, 15),
    flag(Field::IpDf, "ip-df", Ip4, 6, 2, 14),
    flag(Field::IpMf, "ip-mf", Ip4, 6, 2, 13),
    bits(Field::IpFragOffset, "ip-frag-offset", 2, Ip4, 6, 2, 0x1FFF, 0),
    whole(Field::IpTtl, "ip-ttl", Ip4, 8, 1),
    whole(Field::IpProto, "ip-proto", Ip4, 9, 1),
    whole(Field::IpChecksum, "ip-checksum", Ip4, 10, 2),
    address(Field::IpSaddr, "ip-saddr", Ip4, 12, 4),
    address(Field::IpDaddr, "ip-daddr", Ip4, 16, 4),
    payload(Field::IpPayload, "ip-payload", Ip4),
    bits(Field::Ip6Ver, "ip6-ver", 1, Ip6, 0, 4, 0xF000_0000, 28),
    bits(Field::Ip6TrafficClass, "ip6-traffic-class", 1, Ip6, 0, 4, 0x0FF0_0000, 20),
    bits(Field::Ip6FlowLabel, "ip6-flow-label", 3, Ip6, 0, 4, 0x000F_FFFF, 0),
    whole(Field::Ip6Len, "ip6-len", Ip6, 4, 2),
    whole(Field::Ip6Next, "ip6-next", Ip6, 6, 1),
    whole(Field::Ip6HopLimit, "ip6-hop-limit", Ip6, 7, 1),
    address(Field::Ip6Saddr, "ip6-saddr", Ip6, 8, 16),
    address(Field::Ip6Daddr, "ip6-daddr", Ip6, 24, 16),
    payload(Field::Ip6Payload, "ip6-payload", Ip6),
    whole(Field::IcmpType, "icmp-type", Icmp, 0, 1),
    whole(Field::IcmpCode, "icmp-code", Icmp, 1, 1),
    whole(Field::IcmpChecksum, "icmp-checksum", Icmp, 2, 2),
    payload(Field::IcmpPayload, "icmp-payload", Icmp),
    whole(Field::UdpSport, "udp-sport", Udp, 0, 2),
    whole(Field::UdpDport, "udp-dport", Udp, 2, 2),
    whole(Field::UdpLen, "udp-len", Udp, 4, 2),
    whole(Field::UdpChecksum, "udp-checksum", Udp, 6, 2),
    payload(Field::UdpPayload, "udp-payload", Udp),
    whole(Field::TcpSport, "tcp-sport", Tcp, 0, 2),
    whole(Field::TcpDport, "tcp-dport", Tcp, 2, 2),
    whole(Field::TcpSeqNum, "tcp-seq-num", Tcp, 4, 4),
    whole(Field::TcpAckNum, "tcp-ack-num", Tcp, 8, 4),
    bits(Field::TcpOffset, "tcp-offset", 1, Tcp, 12, 1, 0xF0, 4),
    bits(Field::TcpReserved, "tcp-reserved", 1, Tcp, 12, 1, 0x0F, 0),
    whole(Field::TcpUrgPtr, "tcp-urg-ptr", Tcp, 18, 2),
    flag(Field::TcpCwr, "tcp-cwr", Tcp, 13, 1, 7),
    flag(Field::TcpEce, "tcp-ece", Tcp, 13, 1, 6),
    flag(Field::TcpUrg, "tcp-urg", Tcp, 13, 1, 5),
    flag(Field::TcpAck, "tcp-ack", Tcp, 13, 1, 4),
    flag(Field::TcpPush, "tcp-push", Tcp, 13, 1, 3),
    flag(Field::TcpRst, "tcp-rst", Tcp, 13, 1, 2),
    flag(Field::TcpSyn, "tcp-syn", Tcp, 13, 1, 1),
    flag(Field::TcpFin, "tcp-fin", Tcp, 13, 1, 0),
    whole(Field::TcpFlags, "tcp-flags", Tcp, 13, 1),
    whole(Field::TcpWin, "tcp-win", Tcp, 14, 2),
    whole(Field::TcpChecksum, "tcp-checksum", Tcp, 16, 2),
    payload(Field::TcpPayload, "tcp-payload", Tcp),
    option(Field::TcpOptMss, "tcp-opt-mss", Some(2), 2, true),
    option(Field::TcpOptWscale, "tcp-opt-wscale", Some(3), 1, true),
    option(Field::TcpOptSackp, "tcp-opt-sackp", Some(4), 0, true),
    option(Field::TcpOptSack, "tcp-opt-sack", Some(5), 0, false),
    option(Field::TcpOptTimestamp, "tcp-opt-timestamp", Some(8), 8, true),
    option(Field::TcpOptFastOpen, "tcp-opt-fast-open", Some(34), 0, false),
    option(Field::TcpOptMptcp, "tcp-opt-mptcp", Some(30), 0, false),
    option(Field::TcpOpt, "tcp-opt", None, 0, false),
    meta(Field::All, "all", 0),
];

impl Field {
    pub fn spec(self) -> &'static FieldSpec {
        &CATALOG[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn layer(self) -> Layer {
        self.spec().layer
    }

    pub fn from_name(name: &str) -> Option<Self> {
        CATALOG.iter().find(|s| s.name == name).map(|s| s.field)
    }

    /// Catalog entry for a TCP option kind, falling back to `tcp-opt`.
    pub fn for_option_kind(kind: u8) -> Self {
        CATALOG
            .iter()
            .find(|s| s.kind == FieldKind::TcpOption(Some(kind)))
            .map_or(Self::TcpOpt, |s| s.field)
    }

    pub fn is_tcp_option(self) -> bool {
        matches!(self.spec().kind, FieldKind::TcpOption(_))
    }

    pub fn all() -> impl Iterator<Item = Self> {
        CATALOG.iter().map(|s| s.field)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown field: {s}"))
    }
}
