#![no_main]

use libfuzzer_sys::fuzz_target;

use domain::compiler::{Pass, compile, compile_key};

mod common;

// Arbitrary rules either fail validation or compile to a non-empty,
// block-aligned classify key.
fuzz_target!(|data: &[u8]| {
    let Some((Ok(rule), _)) = common::decode_rule(data) else {
        return;
    };

    let compiled = compile(rule).expect("valid rule must compile");
    let classify = &compiled.classify;
    assert!(classify.match_len >= 1);
    assert_eq!(classify.mask.len(), classify.key.len());
    assert_eq!(classify.mask.len() % 16, 0);
    assert!(
        classify
            .key
            .iter()
            .zip(&classify.mask)
            .all(|(k, m)| k & !m == 0),
        "key bits outside the mask"
    );

    // Recompiling is deterministic.
    let again = compile_key(&compiled.rule, Pass::Classify).expect("recompile");
    assert_eq!(&again, classify);
});
