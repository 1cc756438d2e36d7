//! Shared parsing helpers and error types used across the config modules.

use std::net::{Ipv4Addr, Ipv6Addr};

use domain::common::entity::NetworkProtocol;
use domain::field::{Field, FieldKind};

// ── Limits ─────────────────────────────────────────────────────────

/// Maximum number of rules in one config file.
pub(super) const MAX_RULES: usize = 4096;
/// Maximum number of enabled interfaces.
pub(super) const MAX_INTERFACES: usize = 1024;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::Validation {
            field: field.to_string(),
            message: format!("count {count} exceeds maximum {max}"),
        });
    }
    Ok(())
}

// ── Value parsing ──────────────────────────────────────────────────

/// Parse an address with optional prefix into `addr || prefix_len`.
///
/// Supports IPv4 (`"10.0.0.0/8"`, `"10.0.0.1"`) and IPv6 (`"2001:db8::/32"`,
/// `"::1"`), parsed as the address family of `l3`.
pub fn parse_prefix(s: &str, l3: NetworkProtocol) -> Result<Vec<u8>, String> {
    let (addr, prefix) = match s.split_once('/') {
        Some((addr, prefix)) => {
            let len = prefix
                .parse::<u8>()
                .map_err(|_| format!("invalid prefix length: '{prefix}'"))?;
            (addr, Some(len))
        }
        None => (s, None),
    };

    let mut bytes = match l3 {
        NetworkProtocol::Ip4 => addr
            .parse::<Ipv4Addr>()
            .map_err(|e| format!("invalid IPv4 address: {e}"))?
            .octets()
            .to_vec(),
        NetworkProtocol::Ip6 => addr
            .parse::<Ipv6Addr>()
            .map_err(|e| format!("invalid IPv6 address: {e}"))?
            .octets()
            .to_vec(),
    };
    let max = u8::try_from(bytes.len() * 8).unwrap_or(u8::MAX);
    let prefix = prefix.unwrap_or(max);
    if prefix > max {
        return Err(format!("prefix length {prefix} must be 0-{max}"));
    }
    bytes.push(prefix);
    Ok(bytes)
}

/// Parse a protocol keyword in the context of `field`.
fn parse_keyword(field: Field, s: &str) -> Option<Vec<u8>> {
    let value: u16 = match (field, s) {
        (Field::NetProto, "ip4") => NetworkProtocol::Ip4.ethertype(),
        (Field::NetProto, "ip6") => NetworkProtocol::Ip6.ethertype(),
        (Field::IpProto | Field::Ip6Next, "tcp") => 6,
        (Field::IpProto | Field::Ip6Next, "udp") => 17,
        (Field::IpProto, "icmp") => 1,
        (Field::Ip6Next, "icmp") => 58,
        _ => return None,
    };
    Some(value.to_be_bytes().to_vec())
}

/// Parse `"0x.."` into bytes. An odd digit count gets a leading zero.
fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    hex::decode(padded).map_err(|e| format!("invalid hex: {e}"))
}

/// Turn a textual operand into raw bytes for `field`.
///
/// Accepts hex (`0x..`), decimal, addresses with prefix for address
/// fields and protocol keywords (`tcp|udp|icmp|ip4|ip6`). Payload fields
/// take hex or plain text byte for byte, never decimal.
pub fn parse_text_value(field: Field, s: &str) -> Result<Vec<u8>, String> {
    let spec = field.spec();
    if spec.kind == FieldKind::Address {
        let family = spec.layer.network().unwrap_or_default();
        return parse_prefix(s, family);
    }
    if spec.kind == FieldKind::Payload {
        if s.starts_with("0x") || s.starts_with("0X") {
            return parse_hex(s);
        }
        return Ok(s.as_bytes().to_vec());
    }
    if let Some(bytes) = parse_keyword(field, s) {
        return Ok(bytes);
    }
    if s.starts_with("0x") || s.starts_with("0X") {
        return parse_hex(s);
    }
    if let Ok(n) = s.parse::<u128>() {
        return Ok(n.to_be_bytes().to_vec());
    }
    Err("expected an integer, 0x-prefixed hex or a protocol keyword".to_string())
}
