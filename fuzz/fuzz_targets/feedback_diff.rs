#![no_main]

// Normalization and the attribute diff over arbitrary device reports.

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scope_verif::action::Action;
use scope_verif::oracle::normalize::normalize;
use scope_verif::oracle::{count_diff, diff, Feedback, Observation, Replacements};
use scope_verif::types::Attribute;

#[derive(Arbitrary, Debug)]
struct RawReport {
    success: bool,
    target: String,
    result: Vec<(u8, String)>,
}

#[derive(Arbitrary, Debug)]
struct Input {
    a: RawReport,
    b: RawReport,
    replacements: Vec<(String, String)>,
    observed: u8,
}

fn observation(raw: &RawReport) -> Observation {
    let status = if raw.success { "SUCCESS" } else { "FAIL" };
    raw.result.iter().fold(Observation::new(Action::Read, status, &raw.target), |o, (k, v)| {
        let key = Attribute::ALL[*k as usize % Attribute::ALL.len()].key();
        o.with(key, v.as_str())
    })
}

fuzz_target!(|input: Input| {
    let observed: BTreeSet<Attribute> =
        Attribute::ALL.into_iter().enumerate().filter(|(i, _)| input.observed & (1 << i) != 0).map(|(_, a)| a).collect();
    let a = Feedback::Direct(normalize(observation(&input.a), &observed)).to_value();
    let b = Feedback::Privileged { observation: normalize(observation(&input.b), &observed) }.to_value();

    let mut replacements = Replacements::new();
    for (pattern, substitute) in &input.replacements {
        replacements.insert(pattern.as_str(), substitute.as_str());
    }
    // Substitutions never leave the value unparseable.
    let _ = replacements.apply(&a);

    let ab = count_diff(&a, &b);
    let ba = count_diff(&b, &a);
    assert_eq!(ab, ba);
    assert_eq!(ab.count, ab.elements.len());
    assert!(diff(&a, &a, &replacements).is_empty());
});
