// Shared rule decoding for the fuzz targets.

use domain::field::Field;
use domain::rule::{Condition, MatchPredicate, Rule, TargetAction};

const CONDITIONS: [Condition; 6] = [
    Condition::Eq,
    Condition::Ne,
    Condition::Le,
    Condition::Ge,
    Condition::Lt,
    Condition::Gt,
];

fn pick_field(fields: &[Field], byte: u8) -> Field {
    fields[usize::from(byte) % fields.len()]
}

/// Decode one predicate from an 8-byte chunk.
///
///   [0] field, [1] condition (high bit: unary), [2] negate,
///   [3] option kind, [4..8] operand
fn decode_predicate(fields: &[Field], chunk: &[u8]) -> MatchPredicate {
    let field = pick_field(fields, chunk[0]);
    let mut predicate = if chunk[1] & 0x80 != 0 {
        MatchPredicate::unary(field)
    } else {
        let condition = CONDITIONS[usize::from(chunk[1]) % CONDITIONS.len()];
        MatchPredicate::compare(field, condition, &chunk[4..8])
    };
    if field == Field::TcpOpt {
        predicate = predicate.with_option_kind(chunk[3]);
    }
    if chunk[2] & 1 != 0 {
        predicate = predicate.negate();
    }
    predicate
}

/// Decode one target from an 8-byte chunk.
///
///   [0] field, [1] keyword, [2] negate, [3] option kind, [4..8] operand
fn decode_target(fields: &[Field], chunk: &[u8]) -> TargetAction {
    let field = pick_field(fields, chunk[0]);
    let mut target = match chunk[1] % 4 {
        0 => TargetAction::drop(),
        1 => TargetAction::modify(field, &chunk[4..8]),
        2 => TargetAction::strip(field),
        _ => TargetAction::add(field, &chunk[4..8]),
    };
    if field == Field::TcpOpt {
        target = target.with_option_kind(chunk[3]);
    }
    if chunk[2] & 1 != 0 {
        target = target.negate();
    }
    target
}

/// Decode a rule: `[0]` predicate count (0-3), `[1]` target count (1-2),
/// then 8-byte chunks. Returns the rule (valid or not) and the bytes
/// consumed, or `None` when the input runs out.
pub fn decode_rule(data: &[u8]) -> Option<(Result<Rule, domain::rule::error::RuleError>, usize)> {
    let fields: Vec<Field> = Field::all().collect();
    let (&counts, rest) = data.split_first()?;
    let n_matches = usize::from(counts % 4);
    let n_targets = usize::from((counts >> 2) % 2) + 1;
    let needed = (n_matches + n_targets) * 8;
    if rest.len() < needed {
        return None;
    }

    let mut chunks = rest[..needed].chunks_exact(8);
    let matches = chunks
        .by_ref()
        .take(n_matches)
        .map(|c| decode_predicate(&fields, c))
        .collect();
    let targets = chunks.map(|c| decode_target(&fields, c)).collect();
    Some((Rule::new(matches, targets), 1 + needed))
}
