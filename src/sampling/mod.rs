//! Case selection.
//!
//! Bounds the number of executed cases while guaranteeing each rule a minimum
//! coverage count. Every selected case is expanded to its transitive prerequisite
//! chain so dependent integrity cases never run without their setup case.

pub mod predictor;

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::Catalog;
use crate::case::{sha256_hex, TestCase};
use crate::error::HarnessError;
use crate::generator::GeneratedCases;
use crate::verifier::history::History;

pub use predictor::{ConstantPredictor, FailurePredictor, NaiveBayesPredictor};

/// Length of the experiment hash in hex characters.
pub const EXPERIMENT_HASH_LEN: usize = 10;

/// How seed cases are ordered before quota selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Seeded shuffle. Retests cases already in history.
    #[default]
    Random,
    /// Least likely to fail first.
    Exploratory,
    /// Most likely to fail first.
    Extensive,
    /// Farthest from the mean likelihood first.
    Polarized,
}

impl SampleMode {
    /// File-name prefix of campaign state for this mode.
    pub fn file_prefix(self) -> &'static str {
        match self {
            SampleMode::Random => "",
            SampleMode::Exploratory => "exp_",
            SampleMode::Extensive => "ext_",
            SampleMode::Polarized => "pol_",
        }
    }
}

impl std::str::FromStr for SampleMode {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(SampleMode::Random),
            "exploratory" => Ok(SampleMode::Exploratory),
            "extensive" => Ok(SampleMode::Extensive),
            "polarized" => Ok(SampleMode::Polarized),
            other => Err(HarnessError::Config(format!("unknown sample mode: {}", other))),
        }
    }
}

/// Orders a rule's seed cases.
pub trait SamplingStrategy {
    fn order(&self, cases: Vec<TestCase>) -> Vec<TestCase>;

    /// Whether cases already present in history are selected again.
    fn retests_history(&self) -> bool;
}

/// Seeded shuffle over hash-sorted cases; stable for a given seed and case set.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicShuffle {
    pub seed: u64,
}

impl SamplingStrategy for DeterministicShuffle {
    fn order(&self, mut cases: Vec<TestCase>) -> Vec<TestCase> {
        cases.sort_by(|a, b| a.hash().cmp(b.hash()));
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        cases.shuffle(&mut rng);
        cases
    }

    fn retests_history(&self) -> bool {
        true
    }
}

/// Orders cases by a predictor's failure likelihood. Ties are broken by hash.
#[derive(Debug, Clone)]
pub struct WeightedSelection<P: FailurePredictor> {
    pub predictor: P,
    pub mode: SampleMode,
}

impl<P: FailurePredictor> WeightedSelection<P> {
    pub fn new(predictor: P, mode: SampleMode) -> Self {
        WeightedSelection { predictor, mode }
    }
}

impl<P: FailurePredictor> SamplingStrategy for WeightedSelection<P> {
    fn order(&self, cases: Vec<TestCase>) -> Vec<TestCase> {
        if cases.is_empty() {
            return cases;
        }
        let raw: Vec<f64> = cases.iter().map(|c| self.predictor.predict(&c.features())).collect();
        let weights: Vec<f64> = match self.mode {
            SampleMode::Polarized => {
                let mean = raw.iter().sum::<f64>() / raw.len() as f64;
                raw.iter().map(|w| (w - mean).powi(2)).collect()
            }
            _ => raw,
        };
        let descending = !matches!(self.mode, SampleMode::Exploratory);
        let mut scored: Vec<(f64, TestCase)> = weights.into_iter().zip(cases).collect();
        scored.sort_by(|(wa, a), (wb, b)| {
            let by_weight = if descending { wb.total_cmp(wa) } else { wa.total_cmp(wb) };
            by_weight.then_with(|| a.hash().cmp(b.hash()))
        });
        scored.into_iter().map(|(_, c)| c).collect()
    }

    fn retests_history(&self) -> bool {
        false
    }
}

/// Quota and cap parameters.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Baseline minimum case count per rule.
    pub average_min_cases: usize,
    /// Scale each rule's minimum by its share of the candidate space.
    pub proportional_quota: bool,
    /// Global cap; quotas still take precedence.
    pub max_cases: Option<usize>,
    pub max_payload_length: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig { average_min_cases: 61, proportional_quota: true, max_cases: None, max_payload_length: 1 }
    }
}

/// The ordered list of cases a campaign will execute.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Sorted by (payload length, hash).
    pub cases: Vec<TestCase>,
    pub experiment_hash: String,
    pub total_candidates: usize,
    /// Selected cases already known to violate a rule in full history.
    pub known_violations: usize,
}

impl Plan {
    pub fn hashes(&self) -> BTreeSet<String> {
        self.cases.iter().map(|c| c.hash().to_string()).collect()
    }
}

/// First 10 hex chars of SHA-256 over the concatenated case hashes.
pub fn experiment_hash(cases: &[TestCase]) -> String {
    let joined: String = cases.iter().map(TestCase::hash).collect();
    sha256_hex(&joined)[..EXPERIMENT_HASH_LEN].to_string()
}

/// Selects cases from a generation pass.
pub struct Sampler<'a> {
    catalog: &'a Catalog,
    config: SamplerConfig,
}

impl<'a> Sampler<'a> {
    pub fn new(catalog: &'a Catalog, config: SamplerConfig) -> Self {
        Sampler { catalog, config }
    }

    /// Minimum case count for a rule: explicit, flat, or proportional to its share.
    pub fn rule_minimum(&self, explicit: Option<usize>, rule_count: usize, num_rules: usize, total: usize) -> usize {
        if let Some(m) = explicit {
            return m;
        }
        if !self.config.proportional_quota || total == 0 {
            return self.config.average_min_cases;
        }
        (self.config.average_min_cases * num_rules * rule_count) / total
    }

    /// Runs quota selection, cap top-up, forced cases and ordering.
    ///
    /// `history` is the campaign's core history, `full_history` every finished run.
    /// Forced `only_cases` are included with their prerequisite chains.
    pub fn plan(
        &self,
        generated: &GeneratedCases,
        strategy: &dyn SamplingStrategy,
        history: &History,
        full_history: &History,
        only_cases: &[String],
        has_root: bool,
    ) -> Result<Plan, HarnessError> {
        let total_candidates = generated.total();

        let mut skipped = 0usize;
        let mut buckets: BTreeMap<String, BTreeMap<usize, Vec<TestCase>>> = BTreeMap::new();
        for (rule_id, lengths) in &generated.by_rule {
            let rule_buckets = buckets.entry(rule_id.clone()).or_default();
            for (len, cases) in lengths {
                let kept: Vec<TestCase> = cases
                    .iter()
                    .filter(|c| {
                        let tested = history.contains_key(c.hash());
                        if tested && !strategy.retests_history() {
                            skipped += 1;
                            return false;
                        }
                        true
                    })
                    .cloned()
                    .collect();
                rule_buckets.insert(*len, kept);
            }
        }
        if !strategy.retests_history() {
            info!(skipped, "skipping cases already present in history");
        }

        let remaining_total: usize = buckets.values().flat_map(|l| l.values()).map(Vec::len).sum();
        let num_rules = buckets.len();
        let seed_len = self.config.max_payload_length + 1;

        let mut selected: Vec<TestCase> = Vec::new();
        let mut selected_hashes: BTreeSet<String> = BTreeSet::new();
        let mut spare_groups: Vec<Vec<TestCase>> = Vec::new();

        for (rule_id, lengths) in &buckets {
            let rule = self.catalog.rule(rule_id)?;
            let rule_count: usize = lengths.values().map(Vec::len).sum();
            let minimum = self.rule_minimum(rule.minimum_case_required, rule_count, num_rules, remaining_total);
            let seeds = strategy.order(lengths.get(&seed_len).cloned().unwrap_or_default());

            let mut admitted = 0usize;
            for seed in seeds {
                let group = generated.prerequisites.closure(&seed);
                if admitted < minimum {
                    for case in group {
                        if selected_hashes.insert(case.hash().to_string()) {
                            admitted += 1;
                            selected.push(case);
                        }
                    }
                } else {
                    spare_groups.push(group);
                }
            }
            if admitted < minimum {
                warn!(rule = %rule_id, admitted, minimum, "rule does not meet its coverage minimum");
            } else {
                info!(rule = %rule_id, admitted, candidates = rule_count, "rule coverage met");
            }
        }

        if let Some(cap) = self.config.max_cases {
            while selected.len() < cap {
                let Some(group) = spare_groups.pop() else {
                    break;
                };
                for case in group {
                    if selected_hashes.insert(case.hash().to_string()) {
                        selected.push(case);
                    }
                }
            }
        }

        for hash in only_cases {
            let case = generated
                .find(hash)
                .ok_or_else(|| HarnessError::Config(format!("requested case {} was not generated", hash)))?;
            for c in generated.prerequisites.closure(case) {
                if selected_hashes.insert(c.hash().to_string()) {
                    selected.push(c);
                }
            }
        }

        // Shorter counterexamples must be established before longer ones run.
        selected.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

        let known_violations = selected
            .iter()
            .filter(|c| full_history.get(c.hash()).map(|r| r.violated()).unwrap_or(false))
            .count();
        if known_violations > 0 {
            info!(known_violations, selected = selected.len(), "known violations included in plan");
        }

        if !has_root {
            let before = selected.len();
            selected.retain(|c| !c.template().target.is_internal());
            if selected.len() != before {
                warn!(skipped = before - selected.len(), "skipping internal storage cases without root access");
            }
        }

        let experiment_hash = experiment_hash(&selected);
        info!(
            selected = selected.len(),
            candidates = total_candidates,
            experiment_hash = %experiment_hash,
            "sampling finished"
        );

        Ok(Plan { cases: selected, experiment_hash, total_candidates, known_violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::capability::{SecurityRule, StorageTarget};
    use crate::generator::{CaseGenerator, GeneratorConfig};
    use crate::permissions::PermissionSetting;
    use crate::types::{Attribute, Collection, Scope, StorageTier};

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new(Catalog::standard_apis().unwrap());
        let file = catalog.file_api().unwrap();
        let ms = catalog.api("media-store@content-resolver@file-descriptor").unwrap();
        catalog.add_rule(
            SecurityRule::new(
                "T1",
                [Action::Overwrite, Action::Delete],
                vec![StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps)],
                Attribute::ALL,
                vec![file.clone(), ms],
                vec![PermissionSetting::from_array(&[1, 1, 0, 1, 1]).unwrap()],
            )
            .unwrap()
            .with_minimum(3),
        );
        catalog.add_rule(
            SecurityRule::new(
                "C1",
                [Action::Read],
                vec![StorageTarget::new(StorageTier::External, Collection::AppFolder, Scope::OtherApps)],
                Attribute::ALL,
                vec![file],
                vec![PermissionSetting::ALL],
            )
            .unwrap()
            .with_minimum(2),
        );
        catalog
    }

    fn generate(catalog: &Catalog) -> GeneratedCases {
        CaseGenerator::new(catalog, GeneratorConfig::default()).unwrap().generate()
    }

    #[test]
    fn shuffle_is_stable_for_seed() {
        let catalog = catalog();
        let generated = generate(&catalog);
        let cases: Vec<TestCase> = generated.iter().cloned().collect();
        let a = DeterministicShuffle { seed: 7 }.order(cases.clone());
        let mut reversed = cases;
        reversed.reverse();
        let b = DeterministicShuffle { seed: 7 }.order(reversed);
        let ha: Vec<&str> = a.iter().map(TestCase::hash).collect();
        let hb: Vec<&str> = b.iter().map(TestCase::hash).collect();
        assert_eq!(ha, hb);
    }

    #[test]
    fn plan_includes_prerequisites_and_sorts() {
        let catalog = catalog();
        let generated = generate(&catalog);
        let sampler = Sampler::new(&catalog, SamplerConfig::default());
        let plan = sampler
            .plan(&generated, &DeterministicShuffle { seed: 1 }, &History::new(), &History::new(), &[], true)
            .unwrap();
        let hashes = plan.hashes();
        for case in &plan.cases {
            for dep in generated.prerequisites.dependency_hashes(case) {
                assert!(hashes.contains(&dep), "{} selected without {}", case.hash(), dep);
            }
        }
        let keys: Vec<(usize, &str)> = plan.cases.iter().map(TestCase::order_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(plan.experiment_hash.len(), EXPERIMENT_HASH_LEN);
    }

    #[test]
    fn quota_is_checked_before_admitting() {
        let catalog = catalog();
        let generated = generate(&catalog);
        let sampler = Sampler::new(&catalog, SamplerConfig::default());
        let plan = sampler
            .plan(&generated, &DeterministicShuffle { seed: 3 }, &History::new(), &History::new(), &[], true)
            .unwrap();
        let c1 = plan.cases.iter().filter(|c| c.rule().id == "C1").count();
        // C1 has no prerequisites, so each admitted group adds exactly one case.
        assert_eq!(c1, 2);
    }

    #[test]
    fn cap_tops_up_after_quotas() {
        let catalog = catalog();
        let generated = generate(&catalog);
        let config = SamplerConfig { max_cases: Some(12), ..Default::default() };
        let sampler = Sampler::new(&catalog, config);
        let plan = sampler
            .plan(&generated, &DeterministicShuffle { seed: 3 }, &History::new(), &History::new(), &[], true)
            .unwrap();
        assert!(plan.cases.len() >= 12);
        assert!(plan.cases.len() <= generated.total());
    }

    #[test]
    fn weighted_modes_order_by_likelihood() {
        let catalog = catalog();
        let generated = generate(&catalog);
        let cases: Vec<TestCase> = generated.iter().take(5).cloned().collect();
        let flat = WeightedSelection::new(ConstantPredictor(0.3), SampleMode::Extensive).order(cases.clone());
        let hashes: Vec<&str> = flat.iter().map(TestCase::hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
        assert!(!WeightedSelection::new(ConstantPredictor(0.3), SampleMode::Polarized).retests_history());
    }

    #[test]
    fn proportional_minimum_scales_with_share() {
        let catalog = catalog();
        let sampler = Sampler::new(&catalog, SamplerConfig { average_min_cases: 10, ..Default::default() });
        assert_eq!(sampler.rule_minimum(None, 30, 2, 100), 6);
        assert_eq!(sampler.rule_minimum(Some(4), 30, 2, 100), 4);
    }
}
