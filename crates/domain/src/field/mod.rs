pub mod catalog;

pub use catalog::{Field, FieldKind, FieldSpec, Layer};

/// Read a big-endian unsigned integer of up to 16 bytes.
pub fn read_be(bytes: &[u8]) -> u128 {
    let tail = &bytes[bytes.len().saturating_sub(16)..];
    tail.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

/// Write `value` big-endian into `out`, keeping only the low `out.len()` bytes.
pub fn write_be(out: &mut [u8], value: u128) {
    let width = out.len().min(16);
    let bytes = value.to_be_bytes();
    let start = out.len() - width;
    out[start..].copy_from_slice(&bytes[16 - width..]);
    out[..start].fill(0);
}

/// Left-aligned run of `prefix` one-bits inside a `span`-byte window.
pub fn prefix_mask(span: usize, prefix: u8) -> u128 {
    let bits = (span.min(16) * 8) as u32;
    let p = u32::from(prefix).min(bits);
    if p == 0 {
        return 0;
    }
    let ones = if p == 128 { u128::MAX } else { (1u128 << p) - 1 };
    ones << (bits - p)
}

/// Normalise an operand to `width` bytes: drop leading bytes when too
/// long, left-pad with zeros when too short. A width of 0 leaves the
/// operand untouched, as does an empty operand.
pub fn normalize_operand(value: &[u8], width: usize) -> Vec<u8> {
    if width == 0 || value.is_empty() || value.len() == width {
        return value.to_vec();
    }
    if value.len() > width {
        return value[value.len() - width..].to_vec();
    }
    let mut out = vec![0u8; width - value.len()];
    out.extend_from_slice(value);
    out
}
