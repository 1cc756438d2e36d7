//! Mask/key compilation and canonicalisation.

use crate::common::entity::NetworkProtocol;
use crate::field::{Field, FieldKind, FieldSpec, Layer, prefix_mask, read_be};
use crate::rule::{Rule, TargetKeyword};

use super::entity::{BLOCK_SIZE, CompiledKey, CompiledRule, Pass};
use super::error::CompileError;

/// Longest transport header (TCP with 40 bytes of options).
const MAX_TRANSPORT_HEADER: usize = 60;

/// Compile both keys of a rule.
pub fn compile(rule: Rule) -> Result<CompiledRule, CompileError> {
    let classify = compile_key(&rule, Pass::Classify)?;
    let rewrite = if rule.is_drop() || !rule.needs_rewrite() {
        None
    } else {
        Some(compile_key(&rule, Pass::Rewrite)?)
    };
    Ok(CompiledRule {
        rule,
        classify,
        rewrite,
    })
}

/// Compile the classify (matches) or rewrite (targets) key of a rule.
pub fn compile_key(rule: &Rule, pass: Pass) -> Result<CompiledKey, CompileError> {
    let (mask, key) = fill(rule, pass);
    canonicalize(mask, key, pass)
}

/// Zeroed buffer length covering network plus transport header.
pub fn buffer_len(l3: NetworkProtocol) -> usize {
    (l3.base_header_len() + MAX_TRANSPORT_HEADER).div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn version_field(l3: NetworkProtocol) -> Field {
    match l3 {
        NetworkProtocol::Ip4 => Field::IpVer,
        NetworkProtocol::Ip6 => Field::Ip6Ver,
    }
}

/// Offset of a field's header inside the compile buffer, or `None` when
/// the field does not belong to the rule's protocols.
fn header_base(rule: &Rule, layer: Layer) -> Option<usize> {
    if layer.network() == Some(rule.l3) {
        return Some(0);
    }
    match (layer.transport(), rule.l4) {
        (Some(t), Some(l4)) if t == l4 => Some(rule.l3.base_header_len()),
        _ => None,
    }
}

fn fill(rule: &Rule, pass: Pass) -> (Vec<u8>, Vec<u8>) {
    let len = buffer_len(rule.l3);
    let mut mask = vec![0u8; len];
    let mut key = vec![0u8; len];

    match pass {
        Pass::Classify => {
            let version = version_field(rule.l3);
            if !rule.matches.iter().any(|m| m.field == version) {
                write_operand(
                    &mut mask,
                    &mut key,
                    0,
                    version.spec(),
                    &[rule.l3.version()],
                );
            }
            for m in &rule.matches {
                let spec = m.field.spec();
                if let Some(base) = header_base(rule, spec.layer) {
                    write_operand(&mut mask, &mut key, base, spec, &m.value);
                }
            }
        }
        Pass::Rewrite => {
            for t in rule
                .targets
                .iter()
                .filter(|t| t.keyword == TargetKeyword::Modify)
            {
                let spec = t.field.spec();
                if let Some(base) = header_base(rule, spec.layer) {
                    write_operand(&mut mask, &mut key, base, spec, &t.value);
                }
            }
        }
    }
    (mask, key)
}

/// Write one field's mask and key bits at `base + spec.offset`.
fn write_operand(mask: &mut [u8], key: &mut [u8], base: usize, spec: &FieldSpec, value: &[u8]) {
    if !spec.is_header() || value.is_empty() {
        return;
    }
    let span = usize::from(spec.span);
    let (field_mask, field_key) = match spec.kind {
        FieldKind::Address => {
            let prefix = value[value.len() - 1];
            let addr = read_be(&value[..value.len() - 1]);
            let m = prefix_mask(span, prefix);
            (m, addr & m)
        }
        _ => (spec.mask, (read_be(value) << spec.shift) & spec.mask),
    };
    let start = base + usize::from(spec.offset);
    let Some(mask_bytes) = mask.get_mut(start..start + span) else {
        return;
    };
    merge(mask_bytes, field_mask, field_mask);
    if let Some(key_bytes) = key.get_mut(start..start + span) {
        merge(key_bytes, field_mask, field_key);
    }
}

/// Replace the `bits` of a big-endian span with those of `value`.
fn merge(out: &mut [u8], bits: u128, value: u128) {
    let width = out.len();
    for (i, byte) in out.iter_mut().enumerate() {
        let shift = (width - 1 - i) * 8;
        let m = (bits >> shift) as u8;
        let v = (value >> shift) as u8;
        *byte = (*byte & !m) | (v & m);
    }
}

fn block_is_zero(buf: &[u8], block: usize) -> bool {
    buf[block * BLOCK_SIZE..(block + 1) * BLOCK_SIZE]
        .iter()
        .all(|b| *b == 0)
}

/// Trim leading and trailing all-zero mask blocks. The rewrite pass then
/// inverts the mask so it marks protected bytes.
fn canonicalize(
    mut mask: Vec<u8>,
    mut key: Vec<u8>,
    pass: Pass,
) -> Result<CompiledKey, CompileError> {
    let blocks = mask.len() / BLOCK_SIZE;
    let skip = (0..blocks).take_while(|b| block_is_zero(&mask, *b)).count();
    if skip == blocks {
        return Err(CompileError::EmptyKey { pass });
    }
    let end = (skip..blocks)
        .rev()
        .find(|b| !block_is_zero(&mask, *b))
        .map_or(skip + 1, |b| b + 1);

    mask.truncate(end * BLOCK_SIZE);
    key.truncate(end * BLOCK_SIZE);
    mask.drain(..skip * BLOCK_SIZE);
    key.drain(..skip * BLOCK_SIZE);

    if pass == Pass::Rewrite {
        for byte in &mut mask {
            *byte = !*byte;
        }
    }

    Ok(CompiledKey {
        skip: skip as u32,
        match_len: (end - skip) as u32,
        mask,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Condition, MatchPredicate, TargetAction};

    fn eq(field: Field, value: &[u8]) -> MatchPredicate {
        MatchPredicate::compare(field, Condition::Eq, value)
    }

    fn make_rule(matches: Vec<MatchPredicate>, targets: Vec<TargetAction>) -> Rule {
        Rule::new(matches, targets).unwrap()
    }

    // ── Buffer layout ──────────────────────────────────────────────

    #[test]
    fn buffer_is_block_aligned() {
        assert_eq!(buffer_len(NetworkProtocol::Ip4), 80);
        assert_eq!(buffer_len(NetworkProtocol::Ip6), 112);
    }

    #[test]
    fn merge_sets_only_masked_bits() {
        let mut out = [0xFFu8, 0x00];
        merge(&mut out, 0x0FF0, 0x0120);
        assert_eq!(out, [0xF1, 0x20]);
    }

    // ── Classify pass ──────────────────────────────────────────────

    #[test]
    fn empty_rule_is_version_selective() {
        let rule = make_rule(vec![], vec![TargetAction::drop()]);
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert_eq!(key.skip, 0);
        assert_eq!(key.match_len, 1);
        assert_eq!(key.mask[0], 0xF0);
        assert_eq!(key.key[0], 0x40);
        assert!(key.mask[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn ip6_version_is_forced() {
        let rule = make_rule(vec![eq(Field::Ip6HopLimit, &[1])], vec![TargetAction::drop()]);
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert_eq!(key.mask[0], 0xF0);
        assert_eq!(key.key[0], 0x60);
        assert_eq!(key.mask[7], 0xFF);
        assert_eq!(key.key[7], 1);
    }

    #[test]
    fn tcp_port_lands_after_ip_header() {
        let rule = make_rule(
            vec![eq(Field::IpProto, &[6]), eq(Field::TcpDport, &[0, 80])],
            vec![TargetAction::drop()],
        );
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert_eq!(key.skip, 0);
        assert_eq!(key.match_len, 2);
        assert_eq!(key.mask[9], 0xFF);
        assert_eq!(key.key[9], 6);
        assert_eq!(&key.mask[22..24], &[0xFF, 0xFF]);
        assert_eq!(&key.key[22..24], &[0, 80]);
    }

    #[test]
    fn sub_byte_fields_use_bit_patterns() {
        let rule = make_rule(
            vec![
                eq(Field::IpDscp, &[46]),
                MatchPredicate::unary(Field::IpDf),
                MatchPredicate::unary(Field::IpEct1),
            ],
            vec![TargetAction::drop()],
        );
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert_eq!(key.mask[1], 0xFF);
        assert_eq!(key.key[1], (46 << 2) | 1);
        assert_eq!(key.mask[6], 0x40);
        assert_eq!(key.key[6], 0x40);
    }

    #[test]
    fn address_key_drops_host_bits() {
        let rule = make_rule(
            vec![eq(Field::IpSaddr, &[10, 1, 2, 3, 8])],
            vec![TargetAction::drop()],
        );
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert_eq!(&key.mask[12..16], &[0xFF, 0, 0, 0]);
        assert_eq!(&key.key[12..16], &[10, 0, 0, 0]);
    }

    #[test]
    fn zero_prefix_constrains_nothing() {
        let rule = make_rule(
            vec![eq(Field::IpDaddr, &[10, 1, 2, 3, 0])],
            vec![TargetAction::drop()],
        );
        let key = compile_key(&rule, Pass::Classify).unwrap();
        assert!(key.mask[16..20].iter().all(|b| *b == 0));
    }

    #[test]
    fn trailing_zero_blocks_are_trimmed() {
        let rule = make_rule(vec![eq(Field::TcpWin, &[0x10, 0])], vec![TargetAction::drop()]);
        let key = compile_key(&rule, Pass::Classify).unwrap();
        // version in block 0, window at 34..36 in block 2
        assert_eq!(key.skip, 0);
        assert_eq!(key.match_len, 3);
        assert_eq!(key.mask.len(), 48);
        assert_eq!(key.key.len(), 48);
    }

    #[test]
    fn compile_is_idempotent() {
        let rule = make_rule(
            vec![eq(Field::UdpDport, &[0, 53]), eq(Field::IpTtl, &[64])],
            vec![TargetAction::modify(Field::UdpDport, &[0, 54])],
        );
        assert_eq!(compile(rule.clone()).unwrap(), compile(rule).unwrap());
    }

    #[test]
    fn first_and_last_blocks_are_non_zero() {
        let rule = make_rule(
            vec![eq(Field::Ip6Daddr, &[0x20, 1, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 128])],
            vec![TargetAction::drop()],
        );
        let key = compile_key(&rule, Pass::Classify).unwrap();
        let last = key.match_len as usize - 1;
        assert!(key.mask[..BLOCK_SIZE].iter().any(|b| *b != 0));
        assert!(key.mask[last * BLOCK_SIZE..].iter().any(|b| *b != 0));
    }

    // ── Rewrite pass ───────────────────────────────────────────────

    #[test]
    fn rewrite_mask_is_inverted_classify_style_mask() {
        let rule = make_rule(
            vec![eq(Field::TcpDport, &[0, 80])],
            vec![
                TargetAction::modify(Field::TcpDport, &[0x1F, 0x90]),
                TargetAction::modify(Field::IpTtl, &[9]),
            ],
        );
        let rewrite = compile_key(&rule, Pass::Rewrite).unwrap();
        let (mask, key) = fill(&rule, Pass::Rewrite);
        let plain = canonicalize(mask, key, Pass::Classify).unwrap();
        assert_eq!(rewrite.skip, plain.skip);
        assert_eq!(rewrite.match_len, plain.match_len);
        for (r, p) in rewrite.mask.iter().zip(&plain.mask) {
            assert_eq!(*r, !*p);
        }
        assert_eq!(rewrite.key[8], 9);
        assert_eq!(&rewrite.key[22..24], &[0x1F, 0x90]);
    }

    #[test]
    fn rewrite_is_skipped_for_drop() {
        let rule = make_rule(vec![eq(Field::TcpDport, &[0, 80])], vec![TargetAction::drop()]);
        let compiled = compile(rule).unwrap();
        assert!(compiled.rewrite.is_none());
    }

    #[test]
    fn rewrite_address_with_zero_prefix_is_empty() {
        let rule = make_rule(vec![], vec![TargetAction::modify(Field::IpSaddr, &[1, 2, 3, 4, 0])]);
        assert_eq!(
            compile(rule).unwrap_err(),
            CompileError::EmptyKey { pass: Pass::Rewrite }
        );
    }

    #[test]
    fn empty_mask_is_a_defect() {
        let err = canonicalize(vec![0; 32], vec![0; 32], Pass::Classify).unwrap_err();
        assert_eq!(err, CompileError::EmptyKey { pass: Pass::Classify });
    }

    #[test]
    fn leading_zero_blocks_become_skip() {
        let mut mask = vec![0u8; 48];
        mask[40] = 0xFF;
        let key = canonicalize(mask, vec![0; 48], Pass::Classify).unwrap();
        assert_eq!(key.skip, 2);
        assert_eq!(key.match_len, 1);
        assert_eq!(key.mask[8], 0xFF);
    }
}
