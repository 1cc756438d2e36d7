use std::ops::Range;

use crate::common::entity::{NetworkProtocol, TransportProtocol};
use crate::field::{FieldSpec, Layer};

/// Header boundaries of one raw IP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    pub l3: NetworkProtocol,
    /// Network header length (IHL for IPv4, 40 for IPv6).
    pub l3_len: usize,
    /// Raw IP protocol / next-header value.
    pub protocol: u8,
    pub l4: Option<TransportProtocol>,
    /// End of the datagram within the buffer, per the IP length field.
    pub end: usize,
}

impl PacketLayout {
    /// Parse network-layer bounds. Returns `None` for anything that is not
    /// a well-formed IPv4 or IPv6 header inside `packet`.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let first = *packet.first()?;
        match first >> 4 {
            4 => Self::parse_v4(packet),
            6 => Self::parse_v6(packet),
            _ => None,
        }
    }

    fn parse_v4(packet: &[u8]) -> Option<Self> {
        if packet.len() < 20 {
            return None;
        }
        let l3_len = usize::from(packet[0] & 0x0F) * 4;
        if l3_len < 20 || l3_len > packet.len() {
            return None;
        }
        let total = usize::from(u16::from_be_bytes([packet[2], packet[3]]));
        if total < l3_len {
            return None;
        }
        let protocol = packet[9];
        Some(Self {
            l3: NetworkProtocol::Ip4,
            l3_len,
            protocol,
            l4: transport_for(NetworkProtocol::Ip4, protocol),
            end: total.min(packet.len()),
        })
    }

    fn parse_v6(packet: &[u8]) -> Option<Self> {
        if packet.len() < 40 {
            return None;
        }
        let payload = usize::from(u16::from_be_bytes([packet[4], packet[5]]));
        let protocol = packet[6];
        Some(Self {
            l3: NetworkProtocol::Ip6,
            l3_len: 40,
            protocol,
            l4: transport_for(NetworkProtocol::Ip6, protocol),
            end: (40 + payload).min(packet.len()),
        })
    }

    /// Start of the header owning `layer`, if the packet carries it.
    pub fn header_start(&self, layer: Layer) -> Option<usize> {
        if layer.network() == Some(self.l3) {
            return Some(0);
        }
        match (layer.transport(), self.l4) {
            (Some(t), Some(l4)) if t == l4 => Some(self.l3_len),
            _ => None,
        }
    }

    /// Byte range of a header field, bounded by the datagram end.
    pub fn field_range(&self, spec: &FieldSpec) -> Option<Range<usize>> {
        if !spec.is_header() {
            return None;
        }
        let start = self.header_start(spec.layer)? + usize::from(spec.offset);
        let end = start + usize::from(spec.span);
        let limit = if spec.layer.network().is_some() {
            self.l3_len
        } else {
            self.end
        };
        (end <= limit).then_some(start..end)
    }

    /// Transport header length; TCP honours the data offset.
    pub fn transport_len(&self, packet: &[u8]) -> Option<usize> {
        let l4 = self.l4?;
        let len = match l4 {
            TransportProtocol::Tcp => usize::from(packet.get(self.l3_len + 12)? >> 4) * 4,
            other => other.base_header_len(),
        };
        (len >= l4.base_header_len() && self.l3_len + len <= self.end).then_some(len)
    }

    /// Payload bytes following the header of `layer`.
    pub fn payload_range(&self, layer: Layer, packet: &[u8]) -> Option<Range<usize>> {
        let start = if layer.network() == Some(self.l3) {
            self.l3_len
        } else {
            self.header_start(layer)? + self.transport_len(packet)?
        };
        (start <= self.end).then_some(start..self.end)
    }

    /// Iterate the TCP options of a TCP packet.
    pub fn tcp_options<'a>(&self, packet: &'a [u8]) -> TcpOptions<'a> {
        let data = match (self.l4, self.transport_len(packet)) {
            (Some(TransportProtocol::Tcp), Some(len)) => {
                &packet[self.l3_len + TransportProtocol::Tcp.base_header_len()..self.l3_len + len]
            }
            _ => &[],
        };
        TcpOptions { data }
    }
}

fn transport_for(l3: NetworkProtocol, protocol: u8) -> Option<TransportProtocol> {
    TransportProtocol::from_u8(protocol).filter(|t| t.to_u8(l3) == protocol)
}

/// Iterator over `(kind, data)` pairs of a TCP option list.
///
/// Stops at end-of-list or at the first malformed length.
#[derive(Debug, Clone)]
pub struct TcpOptions<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for TcpOptions<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kind = *self.data.first()?;
            match kind {
                0 => {
                    self.data = &[];
                    return None;
                }
                1 => self.data = &self.data[1..],
                _ => {
                    let len = usize::from(*self.data.get(1)?);
                    if len < 2 || len > self.data.len() {
                        self.data = &[];
                        return None;
                    }
                    let value = &self.data[2..len];
                    self.data = &self.data[len..];
                    return Some((kind, value));
                }
            }
        }
    }
}
