use proptest::prelude::*;
use scope_verif::action::Action;
use scope_verif::capability::{Catalog, SecurityRule, StorageTarget};
use scope_verif::case::StepKind;
use scope_verif::generator::{CaseGenerator, GeneratedCases, GeneratorConfig};
use scope_verif::permissions::PermissionSetting;
use scope_verif::sampling::{DeterministicShuffle, Sampler, SamplerConfig};
use scope_verif::types::{Attribute, Collection, Scope, StorageTier};
use std::collections::{BTreeMap, BTreeSet};

fn catalog() -> Catalog {
    let mut catalog = Catalog::new(Catalog::standard_apis().unwrap());
    let file = catalog.file_api().unwrap();
    let ms = catalog.api("media-store@content-resolver@io-stream").unwrap();
    catalog.add_rule(
        SecurityRule::new(
            "T1",
            [Action::Overwrite, Action::Delete, Action::Rename],
            vec![StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps)],
            Attribute::ALL,
            vec![file.clone(), ms],
            vec![PermissionSetting::from_array(&[1, 1, 0, 1, 1]).unwrap()],
        )
        .unwrap(),
    );
    catalog.add_rule(
        SecurityRule::new(
            "C2",
            [Action::Read],
            vec![StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps)],
            Attribute::ALL,
            vec![file],
            vec![PermissionSetting::ALL],
        )
        .unwrap(),
    );
    catalog
}

fn generate(catalog: &Catalog, seed: u64) -> GeneratedCases {
    CaseGenerator::new(catalog, GeneratorConfig { seed, ..Default::default() }).unwrap().generate()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every selected case arrives with its whole prerequisite chain, scheduled earlier.
    #[test]
    fn prop_plan_is_closed_under_prerequisites(
        seed in any::<u64>(),
        minimum in 1usize..12,
        cap in prop::option::of(0usize..40),
    ) {
        let catalog = catalog();
        let generated = generate(&catalog, seed);
        let config = SamplerConfig { average_min_cases: minimum, proportional_quota: false, max_cases: cap, max_payload_length: 1 };
        let plan = Sampler::new(&catalog, config)
            .plan(&generated, &DeterministicShuffle { seed }, &BTreeMap::new(), &BTreeMap::new(), &[], true)
            .unwrap();

        let position: BTreeMap<&str, usize> = plan.cases.iter().enumerate().map(|(i, c)| (c.hash(), i)).collect();
        prop_assert_eq!(position.len(), plan.cases.len());
        for case in &plan.cases {
            for dep in generated.prerequisites.closure(case) {
                let at = position.get(dep.hash());
                prop_assert!(at.is_some(), "{} missing prerequisite {}", case.hash(), dep.hash());
                prop_assert!(*at.unwrap() <= position[case.hash()]);
            }
        }
        for pair in plan.cases.windows(2) {
            prop_assert!(pair[0].order_key() <= pair[1].order_key());
        }
    }

    /// An integrity case whose last step is a rule action depends on exactly one
    /// shorter case: the one finishing with that step.
    #[test]
    fn prop_prerequisite_is_the_shorter_case(seed in any::<u64>(), pick in any::<prop::sample::Index>()) {
        let catalog = catalog();
        let generated = generate(&catalog, seed);
        let rule = catalog.rule("T1").unwrap();
        let chained: Vec<_> = generated
            .iter()
            .filter(|c| c.rule().id == "T1" && c.payload().len() == 2 && c.payload().steps()[0].kind == StepKind::Setup)
            .filter(|c| match c.payload().steps()[1].kind {
                StepKind::Act(a) => rule.actions.contains(&a) && rule.has_api(&c.payload().steps()[1].api),
                StepKind::Setup => false,
            })
            .collect();
        prop_assume!(!chained.is_empty());
        let case = pick.get(&chained);

        let deps = generated.prerequisites.dependencies_of(case).cloned().unwrap_or_default();
        prop_assert_eq!(deps.len(), 1);
        let dep = deps.values().next().unwrap();
        prop_assert_eq!(dep.payload().len(), 1);
        prop_assert_eq!(dep.feature(false), case.feature(true));
        prop_assert_eq!(StepKind::Act(dep.final_action()), case.payload().steps()[1].kind);
        prop_assert_eq!(dep.template(), case.template());
    }

    /// Only integrity cases are ever registered as prerequisites.
    #[test]
    fn prop_only_integrity_cases_are_prerequisites(seed in any::<u64>()) {
        let catalog = catalog();
        let generated = generate(&catalog, seed);
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for case in generated.iter() {
            for dep in generated.prerequisites.dependency_hashes(case) {
                seen.insert(dep);
            }
        }
        for hash in &seen {
            prop_assert_eq!(&generated.find(hash).unwrap().rule().id, "T1");
        }
    }
}
