//! Combinatorial case generation and the prerequisite index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::action::Action;
use crate::capability::{extensions_for, Catalog, SecurityRule, StorageApi, StorageTarget};
use crate::case::{Payload, PayloadStep, TestCase};
use crate::error::HarnessError;
use crate::types::RuleType;

/// Generation parameters.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Maximum number of attacker steps around the setup step. Must be positive.
    pub max_payload_length: usize,
    /// Experiment seed baked into every case identity.
    pub seed: u64,
    /// Rule ids to skip.
    pub disabled_rules: BTreeSet<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig { max_payload_length: 1, seed: 10, disabled_rules: BTreeSet::new() }
    }
}

/// Maps a full case feature to the integrity cases carrying it.
///
/// A case depends on every case registered under its prerequisite feature.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteIndex {
    by_feature: BTreeMap<String, BTreeMap<String, TestCase>>,
}

impl PrerequisiteIndex {
    pub fn register(&mut self, case: &TestCase) {
        self.by_feature
            .entry(case.feature(false))
            .or_default()
            .entry(case.hash().to_string())
            .or_insert_with(|| case.clone());
    }

    /// Direct dependencies of `case`, keyed by hash.
    pub fn dependencies_of(&self, case: &TestCase) -> Option<&BTreeMap<String, TestCase>> {
        self.by_feature.get(&case.feature(true))
    }

    pub fn dependency_hashes(&self, case: &TestCase) -> Vec<String> {
        self.dependencies_of(case).map(|m| m.keys().cloned().collect()).unwrap_or_default()
    }

    /// `case` followed by its transitive dependencies, each case once.
    pub fn closure(&self, case: &TestCase) -> Vec<TestCase> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut group = Vec::new();
        let mut stack = vec![case.clone()];
        while let Some(curr) = stack.pop() {
            if !visited.insert(curr.hash().to_string()) {
                continue;
            }
            if let Some(deps) = self.dependencies_of(&curr) {
                stack.extend(deps.values().cloned());
            }
            group.push(curr);
        }
        group
    }

    pub fn len(&self) -> usize {
        self.by_feature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_feature.is_empty()
    }
}

/// Output of a generation pass.
#[derive(Debug, Clone, Default)]
pub struct GeneratedCases {
    /// rule id -> payload length -> cases.
    pub by_rule: BTreeMap<String, BTreeMap<usize, Vec<TestCase>>>,
    pub prerequisites: PrerequisiteIndex,
}

impl GeneratedCases {
    pub fn total(&self) -> usize {
        self.by_rule.values().flat_map(|lengths| lengths.values()).map(Vec::len).sum()
    }

    pub fn rule_total(&self, rule_id: &str) -> usize {
        self.by_rule.get(rule_id).map(|l| l.values().map(Vec::len).sum()).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.by_rule.values().flat_map(|lengths| lengths.values()).flatten()
    }

    pub fn find(&self, hash: &str) -> Option<&TestCase> {
        self.iter().find(|c| c.hash() == hash)
    }
}

/// Enumerates every valid case for the catalog's rules.
pub struct CaseGenerator<'a> {
    catalog: &'a Catalog,
    config: GeneratorConfig,
}

impl<'a> CaseGenerator<'a> {
    pub fn new(catalog: &'a Catalog, config: GeneratorConfig) -> Result<Self, HarnessError> {
        if config.max_payload_length == 0 {
            return Err(HarnessError::Config("payload length should be greater than 0".into()));
        }
        Ok(CaseGenerator { catalog, config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn generate(&self) -> GeneratedCases {
        let mut out = GeneratedCases::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for rule in self.catalog.rules() {
            if self.config.disabled_rules.contains(&rule.id) {
                debug!(rule = %rule.id, "rule disabled, skipping");
                continue;
            }
            let mut actions: Vec<Action> = rule.actions.iter().copied().collect();
            actions.sort_by_key(|a| a.name());
            let mut targets = rule.targets.clone();
            targets.sort_by_key(|t| t.to_string());
            let payloads_by_target: Vec<Vec<Payload>> = targets
                .iter()
                .map(|t| self.generate_payloads(&available_apis(rule, t), t, self.config.max_payload_length))
                .collect();

            for api in &rule.apis {
                for &final_action in &actions {
                    for (target, payloads) in targets.iter().zip(&payloads_by_target) {
                        if !api.is_valid_target(target) || !api.is_valid_action(final_action) {
                            continue;
                        }
                        for template in target.get_paths() {
                            if !rule.is_applicable(api, final_action, &template) {
                                continue;
                            }
                            for ext in extensions_for(&template.template) {
                                for perm in &rule.permissions {
                                    for payload in payloads {
                                        let case = TestCase::new(
                                            rule.clone(),
                                            final_action,
                                            api.clone(),
                                            payload.clone(),
                                            *perm,
                                            template.clone(),
                                            ext,
                                            self.config.seed,
                                        );
                                        if !seen.insert(case.hash().to_string()) {
                                            continue;
                                        }
                                        if rule.rule_type == RuleType::Integrity {
                                            out.prerequisites.register(&case);
                                        }
                                        out.by_rule
                                            .entry(rule.id.clone())
                                            .or_default()
                                            .entry(case.payload().len())
                                            .or_default()
                                            .push(case);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        info!(total = seen.len(), prerequisites = out.prerequisites.len(), "generated cases");
        out
    }

    /// Every distinct payload of `1..=length + 1` steps around one setup slot,
    /// sorted by (length, canonical string).
    ///
    /// The setup slot expands over every API able to create a file on `target`.
    pub fn generate_payloads(
        &self,
        available: &[Arc<StorageApi>],
        target: &StorageTarget,
        length: usize,
    ) -> Vec<Payload> {
        let mut apis: Vec<Arc<StorageApi>> = available.to_vec();
        apis.sort_by(|a, b| b.name().cmp(a.name()));

        let mut steps: Vec<(Action, Arc<StorageApi>)> = Vec::new();
        for action in Action::ALL {
            for api in &apis {
                if !api.is_valid_action(action) || !api.is_valid_target(target) {
                    continue;
                }
                if target.is_external_shared() && api.is_saf_picker() {
                    continue;
                }
                steps.push((action, api.clone()));
            }
        }

        // `None` marks the setup slot.
        let mut raw: Vec<Vec<Option<(Action, Arc<StorageApi>)>>> = vec![vec![None]];
        for i in 0..length {
            let current = raw.len();
            for j in 0..current {
                if raw[j].len() < i + 1 {
                    continue;
                }
                let base = raw[j].clone();
                for step in &steps {
                    let mut front = Vec::with_capacity(base.len() + 1);
                    front.push(Some(step.clone()));
                    front.extend(base.iter().cloned());
                    raw.push(front);
                    let mut back = base.clone();
                    back.push(Some(step.clone()));
                    raw.push(back);
                }
            }
        }

        let setup_apis: Vec<&Arc<StorageApi>> = apis
            .iter()
            .filter(|a| a.is_valid_action(Action::Create) && a.is_valid_target(target))
            .collect();

        let mut unique: BTreeMap<(usize, String), Payload> = BTreeMap::new();
        for p in &raw {
            for setup_api in &setup_apis {
                let payload = Payload::new(
                    p.iter()
                        .map(|slot| match slot {
                            None => PayloadStep::setup((*setup_api).clone()),
                            Some((action, api)) => PayloadStep::act(*action, api.clone()),
                        })
                        .collect(),
                );
                unique.entry((payload.len(), payload.to_string())).or_insert(payload);
            }
        }
        unique.into_values().collect()
    }
}

/// APIs usable in payloads: the rule's APIs, minus picker APIs on external shared
/// collections where user interaction is assumed to favor the attacker.
pub fn available_apis(rule: &SecurityRule, target: &StorageTarget) -> Vec<Arc<StorageApi>> {
    rule.apis
        .iter()
        .filter(|a| !(target.is_external_shared() && a.is_saf_picker()))
        .cloned()
        .collect()
}
