#![no_main]

// The categorizer must tolerate any recorded detail, including ones read back
// from hand-edited result files.

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use scope_verif::categorize::{categorize, PrerequisiteRecord};
use scope_verif::oracle::CaseDetail;

fuzz_target!(|data: (&str, &[u8])| {
    let (case, detail_json) = data;
    let Ok(detail) = serde_json::from_slice::<CaseDetail>(detail_json) else {
        return;
    };
    let mut prerequisites = BTreeMap::new();
    prerequisites.insert(
        "00000000000".to_string(),
        PrerequisiteRecord { score: 1.0, case: case.to_string(), violated: true },
    );
    let _ = categorize(case, &detail, &prerequisites);
    let _ = categorize(case, &detail, &BTreeMap::new());
});
