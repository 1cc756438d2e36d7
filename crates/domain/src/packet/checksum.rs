//! Internet checksums (RFC 1071) for IPv4 headers and transport segments.

use crate::common::entity::{NetworkProtocol, TransportProtocol};
use crate::field::Field;

use super::view::PacketLayout;

/// Add `data` as big-endian 16-bit words, skipping the word at `skip`.
fn sum_words(data: &[u8], skip: Option<usize>, mut sum: u64) -> u64 {
    let mut i = 0;
    while i + 1 < data.len() {
        if Some(i) != skip {
            sum += u64::from(u16::from_be_bytes([data[i], data[i + 1]]));
        }
        i += 2;
    }
    if i < data.len() {
        sum += u64::from(data[i]) << 8;
    }
    sum
}

fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum of an IPv4 header, ignoring whatever the checksum field holds.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    fold(sum_words(header, Some(10), 0))
}

fn checksum_offset(l4: TransportProtocol) -> usize {
    let field = match l4 {
        TransportProtocol::Icmp => Field::IcmpChecksum,
        TransportProtocol::Udp => Field::UdpChecksum,
        TransportProtocol::Tcp => Field::TcpChecksum,
    };
    usize::from(field.spec().offset)
}

/// Checksum of the transport segment, including the pseudo-header where
/// the protocol requires one. ICMP over IPv4 has none.
pub fn transport_checksum(packet: &[u8], layout: &PacketLayout) -> Option<u16> {
    let l4 = layout.l4?;
    let segment = packet.get(layout.l3_len..layout.end)?;
    if segment.len() < l4.base_header_len() {
        return None;
    }
    let mut sum = 0u64;
    let pseudo = !(l4 == TransportProtocol::Icmp && layout.l3 == NetworkProtocol::Ip4);
    if pseudo {
        let addrs = match layout.l3 {
            NetworkProtocol::Ip4 => packet.get(12..20)?,
            NetworkProtocol::Ip6 => packet.get(8..40)?,
        };
        sum = sum_words(addrs, None, sum);
        sum += u64::from(layout.protocol);
        sum += segment.len() as u64;
    }
    sum = sum_words(segment, Some(checksum_offset(l4)), sum);
    let csum = fold(sum);
    if l4 == TransportProtocol::Udp && csum == 0 {
        return Some(0xFFFF);
    }
    Some(csum)
}

/// Recompute and store the transport checksum. Returns `false` when the
/// segment is too short to carry one.
pub fn update_transport_checksum(packet: &mut [u8], layout: &PacketLayout) -> bool {
    let (Some(l4), Some(csum)) = (layout.l4, transport_checksum(packet, layout)) else {
        return false;
    };
    let at = layout.l3_len + checksum_offset(l4);
    packet[at..at + 2].copy_from_slice(&csum.to_be_bytes());
    true
}

/// Recompute and store the IPv4 header checksum. No-op for IPv6.
pub fn update_ipv4_checksum(packet: &mut [u8], layout: &PacketLayout) {
    if layout.l3 != NetworkProtocol::Ip4 {
        return;
    }
    let Some(header) = packet.get(..layout.l3_len) else {
        return;
    };
    let csum = ipv4_header_checksum(header);
    packet[10..12].copy_from_slice(&csum.to_be_bytes());
}
