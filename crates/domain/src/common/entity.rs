use serde::{Deserialize, Serialize};

/// Network-layer protocol a rule (or a packet) is carried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NetworkProtocol {
    #[default]
    Ip4,
    Ip6,
}

impl NetworkProtocol {
    /// Ethertype as carried in the `net-proto` field.
    pub fn ethertype(self) -> u16 {
        match self {
            Self::Ip4 => 0x0800,
            Self::Ip6 => 0x86DD,
        }
    }

    pub fn from_ethertype(value: u16) -> Option<Self> {
        match value {
            0x0800 => Some(Self::Ip4),
            0x86DD => Some(Self::Ip6),
            _ => None,
        }
    }

    /// IP version nibble.
    pub fn version(self) -> u8 {
        match self {
            Self::Ip4 => 4,
            Self::Ip6 => 6,
        }
    }

    /// Fixed header length without options (IPv4) or extension headers (IPv6).
    pub fn base_header_len(self) -> usize {
        match self {
            Self::Ip4 => 20,
            Self::Ip6 => 40,
        }
    }
}

impl std::fmt::Display for NetworkProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip4 => write!(f, "ip4"),
            Self::Ip6 => write!(f, "ip6"),
        }
    }
}

/// Transport protocols the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Icmp,
    Udp,
    Tcp,
}

impl TransportProtocol {
    /// IP protocol number for the given network layer. ICMP over IPv6 is 58.
    pub fn to_u8(self, network: NetworkProtocol) -> u8 {
        match (self, network) {
            (Self::Icmp, NetworkProtocol::Ip4) => 1,
            (Self::Icmp, NetworkProtocol::Ip6) => 58,
            (Self::Udp, _) => 17,
            (Self::Tcp, _) => 6,
        }
    }

    /// Map an IP protocol number. Unknown protocols return `None`.
    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 | 58 => Some(Self::Icmp),
            17 => Some(Self::Udp),
            6 => Some(Self::Tcp),
            _ => None,
        }
    }

    /// Length of the fixed transport header, without TCP options.
    pub fn base_header_len(self) -> usize {
        match self {
            Self::Icmp => 4,
            Self::Udp => 8,
            Self::Tcp => 20,
        }
    }
}

impl std::fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Icmp => write!(f, "icmp"),
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}
