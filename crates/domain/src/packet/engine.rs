use crate::rule::Rule;

use super::matcher::first_match;
use super::rewriter::{Verdict, apply};
use super::view::PacketLayout;

/// Outcome of running one packet through a rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Zero-based index of the matched rule.
    pub rule_index: Option<usize>,
    pub verdict: Verdict,
}

impl Evaluation {
    pub fn no_match() -> Self {
        Self {
            rule_index: None,
            verdict: Verdict::Forward,
        }
    }
}

/// Find the first matching rule and apply it in place. Packets that do
/// not parse, or that no rule matches, are forwarded unchanged.
pub fn match_and_rewrite<'a, I>(rules: I, packet: &mut [u8], ingress: Option<u32>) -> Evaluation
where
    I: IntoIterator<Item = &'a Rule>,
    I::IntoIter: Clone,
{
    let Some(layout) = PacketLayout::parse(packet) else {
        return Evaluation::no_match();
    };
    let rules = rules.into_iter();
    let Some(index) = first_match(rules.clone(), packet, &layout, ingress) else {
        return Evaluation::no_match();
    };
    let Some(rule) = rules.clone().nth(index) else {
        return Evaluation::no_match();
    };
    Evaluation {
        rule_index: Some(index),
        verdict: apply(packet, rule),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::packet::testing::{ipv4_tcp, ipv4_udp, ipv6_udp, reference_checksum};
    use crate::rule::{Condition, MatchPredicate, TargetAction};

    fn eq(field: Field, value: &[u8]) -> MatchPredicate {
        MatchPredicate::compare(field, Condition::Eq, value)
    }

    fn make_rule(matches: Vec<MatchPredicate>, targets: Vec<TargetAction>) -> Rule {
        Rule::new(matches, targets).unwrap()
    }

    #[test]
    fn tcp_port_80_drop_scenario() {
        let rule = make_rule(
            vec![eq(Field::IpProto, &[6]), eq(Field::TcpDport, &[0, 80])],
            vec![TargetAction::drop()],
        );
        let mut syn = ipv4_tcp(80, 0x02, &[]);
        let eval = match_and_rewrite([&rule], &mut syn, None);
        assert_eq!(eval.rule_index, Some(0));
        assert_eq!(eval.verdict, Verdict::Drop);

        let mut udp = ipv4_udp(80, &[]);
        let before = udp.clone();
        let eval = match_and_rewrite([&rule], &mut udp, None);
        assert_eq!(eval, Evaluation::no_match());
        assert_eq!(udp, before);
    }

    #[test]
    fn catch_all_drop_shadows_later_rules() {
        let all = make_rule(vec![], vec![TargetAction::drop()]);
        let specific = make_rule(
            vec![eq(Field::UdpDport, &[0, 53])],
            vec![TargetAction::modify(Field::IpTtl, &[1])],
        );
        for mut pkt in [ipv4_udp(53, &[]), ipv4_tcp(22, 0x10, &[])] {
            let eval = match_and_rewrite([&all, &specific], &mut pkt, None);
            assert_eq!(eval.rule_index, Some(0));
            assert_eq!(eval.verdict, Verdict::Drop);
        }
    }

    #[test]
    fn catch_all_only_covers_its_scope() {
        let all = make_rule(vec![], vec![TargetAction::drop()]);
        let mut pkt = ipv6_udp(53, &[]);
        assert_eq!(match_and_rewrite([&all], &mut pkt, None), Evaluation::no_match());
    }

    #[test]
    fn first_match_not_best_match() {
        let r0 = make_rule(vec![eq(Field::TcpDport, &[0, 80])], vec![TargetAction::modify(Field::IpTtl, &[10])]);
        let r1 = make_rule(vec![eq(Field::TcpDport, &[0, 81])], vec![TargetAction::drop()]);
        let r2 = make_rule(vec![eq(Field::IpTtl, &[64])], vec![TargetAction::drop()]);
        let mut pkt = ipv4_tcp(80, 0x02, &[]);
        let eval = match_and_rewrite([&r0, &r1, &r2], &mut pkt, None);
        assert_eq!(eval.rule_index, Some(0));
        assert_eq!(eval.verdict, Verdict::Forward);
        assert_eq!(pkt[8], 10);
    }

    #[test]
    fn rewrite_matches_reference_checksum() {
        let rule = make_rule(
            vec![eq(Field::TcpDport, &[0, 80])],
            vec![TargetAction::modify(Field::TcpDport, &[0x1F, 0x90])],
        );
        let mut pkt = ipv4_tcp(80, 0x18, &[]);
        match_and_rewrite([&rule], &mut pkt, None);
        assert_eq!(u16::from_be_bytes([pkt[36], pkt[37]]), reference_checksum(&pkt));
    }

    #[test]
    fn garbage_is_forwarded() {
        let rule = make_rule(vec![], vec![TargetAction::drop()]);
        let mut pkt = vec![0xFFu8; 7];
        assert_eq!(match_and_rewrite([&rule], &mut pkt, None), Evaluation::no_match());
    }
}
