#![no_main]

// Arbitrary text must never panic the case parser, and anything that parses
// must be accepted again from its own canonical pieces.

use libfuzzer_sys::fuzz_target;
use scope_verif::capability::Catalog;
use scope_verif::case::{PrintableCase, TestCase};

fuzz_target!(|text: &str| {
    let Ok(parsed) = PrintableCase::parse(text) else {
        return;
    };
    assert!(!parsed.rule_id.is_empty());
    let _ = parsed.setup_index();
    let _ = parsed.payload_printable();

    // Rebuilding only succeeds when the text is exactly the canonical form.
    if let Ok(catalog) = Catalog::standard() {
        if let Ok(case) = TestCase::from_printable(text, &catalog) {
            assert_eq!(case.printable(), text);
        }
    }
});
