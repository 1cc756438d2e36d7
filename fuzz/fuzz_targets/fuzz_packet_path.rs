#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::packet::match_and_rewrite;

mod common;

// Layout:
//   [0]    = number of rule slots (0-3)
//   [1]    = ingress interface (0 = none)
//   then   = encoded rules (see common::decode_rule)
//   rest   = the packet
//
// Match-and-rewrite must never panic and must keep the packet length.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let slots = data[0] % 4;
    let ingress = (data[1] != 0).then(|| u32::from(data[1]));
    let mut cursor = 2;

    let mut rules = Vec::new();
    for _ in 0..slots {
        let Some((rule, used)) = common::decode_rule(&data[cursor..]) else {
            break;
        };
        cursor += used;
        if let Ok(rule) = rule {
            rules.push(rule);
        }
    }

    let mut packet = data[cursor..].to_vec();
    let len = packet.len();
    let eval = match_and_rewrite(rules.iter(), &mut packet, ingress);
    assert_eq!(packet.len(), len);
    if let Some(index) = eval.rule_index {
        assert!(index < rules.len());
    }
});
