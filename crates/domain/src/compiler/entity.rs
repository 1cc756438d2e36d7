use std::fmt;

use crate::rule::Rule;

/// Classifier keys are handled in blocks of this many bytes.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Mask marks bits constrained by the rule's predicates.
    Classify,
    /// Mask marks the bytes targets may overwrite, bit-inverted: writable
    /// bits are clear, bits the targets leave alone are set.
    Rewrite,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classify => f.write_str("classify"),
            Self::Rewrite => f.write_str("rewrite"),
        }
    }
}

/// Canonical block-aligned mask/key pair.
///
/// `skip` leading blocks and any trailing blocks with an all-zero mask
/// have been removed; `mask` and `key` are `match_len * BLOCK_SIZE` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledKey {
    pub skip: u32,
    pub match_len: u32,
    pub mask: Vec<u8>,
    pub key: Vec<u8>,
}

impl CompiledKey {
    /// Two keys can share a classifier table when mask, skip and match agree.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.skip == other.skip && self.match_len == other.match_len && self.mask == other.mask
    }

    /// Offset of the first significant byte in the header buffer.
    pub fn byte_offset(&self) -> usize {
        self.skip as usize * BLOCK_SIZE
    }

    /// Whether the header bytes starting at offset 0 satisfy this key.
    pub fn matches(&self, header: &[u8]) -> bool {
        let start = self.byte_offset();
        self.mask.iter().zip(&self.key).enumerate().all(|(i, (m, k))| {
            let byte = header.get(start + i).copied().unwrap_or(0);
            byte & m == *k
        })
    }
}

/// A rule together with the keys used to program the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRule {
    pub rule: Rule,
    pub classify: CompiledKey,
    /// Absent for drop rules and rules without header modifications.
    pub rewrite: Option<CompiledKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(skip: u32, mask: u8, key: u8) -> CompiledKey {
        let mut m = vec![0u8; BLOCK_SIZE];
        let mut k = vec![0u8; BLOCK_SIZE];
        m[0] = mask;
        k[0] = key;
        CompiledKey {
            skip,
            match_len: 1,
            mask: m,
            key: k,
        }
    }

    #[test]
    fn shape_ignores_key_bytes() {
        assert!(key(0, 0xF0, 0x40).same_shape(&key(0, 0xF0, 0x60)));
        assert!(!key(0, 0xF0, 0x40).same_shape(&key(1, 0xF0, 0x40)));
        assert!(!key(0, 0xF0, 0x40).same_shape(&key(0, 0xFF, 0x40)));
    }

    #[test]
    fn matches_applies_mask_after_skip() {
        let k = key(1, 0xF0, 0x40);
        let mut header = vec![0u8; 32];
        header[16] = 0x45;
        assert!(k.matches(&header));
        header[16] = 0x65;
        assert!(!k.matches(&header));
    }
}
