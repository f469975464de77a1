use proptest::prelude::*;
use scope_verif::action::Action;
use scope_verif::capability::{Catalog, SecurityRule, StorageTarget};
use scope_verif::case::{sha256_hex, PrintableCase, TestCase};
use scope_verif::generator::{CaseGenerator, GeneratorConfig};
use scope_verif::permissions::PermissionSetting;
use scope_verif::types::{Attribute, Collection, Scope, StorageTier};
use std::collections::BTreeSet;

fn catalog() -> Catalog {
    let mut catalog = Catalog::new(Catalog::standard_apis().unwrap());
    let file = catalog.file_api().unwrap();
    let ms = catalog.api("media-store@content-resolver@io-stream").unwrap();
    catalog.add_rule(
        SecurityRule::new(
            "T1",
            [Action::Overwrite, Action::Delete],
            vec![StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps)],
            Attribute::ALL,
            vec![file, ms],
            vec![PermissionSetting::from_array(&[1, 1, 0, 1, 1]).unwrap()],
        )
        .unwrap(),
    );
    catalog
}

fn generate(catalog: &Catalog, seed: u64) -> Vec<TestCase> {
    let config = GeneratorConfig { seed, ..Default::default() };
    CaseGenerator::new(catalog, config).unwrap().generate().iter().cloned().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The hash is the first 11 hex chars of SHA-256 over the printable form.
    #[test]
    fn prop_hash_is_printable_digest(seed in any::<u64>(), pick in any::<prop::sample::Index>()) {
        let catalog = catalog();
        let cases = generate(&catalog, seed);
        let case = pick.get(&cases);
        prop_assert_eq!(case.hash().len(), 11);
        prop_assert_eq!(case.hash(), &sha256_hex(case.printable())[..11]);
        let suffix = format!("_{}", seed);
        prop_assert!(case.printable().ends_with(&suffix), "{} lacks seed suffix {}", case.printable(), suffix);
    }

    /// Two generation passes with the same seed produce the same cases in the same order.
    #[test]
    fn prop_generation_is_deterministic(seed in any::<u64>()) {
        let catalog = catalog();
        let a: Vec<String> = generate(&catalog, seed).iter().map(|c| c.hash().to_string()).collect();
        let b: Vec<String> = generate(&catalog, seed).iter().map(|c| c.hash().to_string()).collect();
        prop_assert_eq!(&a, &b);
        let unique: BTreeSet<&String> = a.iter().collect();
        prop_assert_eq!(unique.len(), a.len());
    }

    /// A printable form parses and rebuilds into the same case.
    #[test]
    fn prop_printable_rebuilds_case(seed in any::<u64>(), pick in any::<prop::sample::Index>()) {
        let catalog = catalog();
        let cases = generate(&catalog, seed);
        let case = pick.get(&cases);
        let parsed = PrintableCase::parse(case.printable()).unwrap();
        prop_assert_eq!(&parsed.rule_id, "T1");
        prop_assert_eq!(parsed.seed, seed);
        prop_assert_eq!(parsed.payload.len(), case.payload().len());
        let rebuilt = TestCase::from_printable(case.printable(), &catalog).unwrap();
        prop_assert_eq!(rebuilt.hash(), case.hash());
    }

    /// Changing the seed changes every identity.
    #[test]
    fn prop_seed_is_part_of_identity(seed in 0u64..u64::MAX) {
        let catalog = catalog();
        let a: BTreeSet<String> = generate(&catalog, seed).iter().map(|c| c.hash().to_string()).collect();
        let b: BTreeSet<String> = generate(&catalog, seed + 1).iter().map(|c| c.hash().to_string()).collect();
        prop_assert!(a.is_disjoint(&b));
    }
}
