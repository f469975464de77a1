//! Executable test cases and their content-derived identity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::action::Action;
use crate::capability::{Catalog, PathTemplate, SecurityRule, StorageApi};
use crate::case::payload::{Payload, PayloadStep, SETUP};
use crate::case::printable::PrintableCase;
use crate::error::HarnessError;
use crate::permissions::PermissionSetting;

/// Length of a case hash in hex characters.
pub const CASE_HASH_LEN: usize = 11;

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// One probe: under `permission`, run `payload` then `final_action` through `api`
/// against a file under `template` with extension `ext`.
///
/// The printable form and hash are computed once at construction; a case is
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct TestCase {
    rule: Arc<SecurityRule>,
    final_action: Action,
    api: Arc<StorageApi>,
    payload: Payload,
    permission: PermissionSetting,
    template: PathTemplate,
    ext: String,
    seed: u64,
    printable: String,
    hash: String,
}

impl TestCase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule: Arc<SecurityRule>,
        final_action: Action,
        api: Arc<StorageApi>,
        payload: Payload,
        permission: PermissionSetting,
        template: PathTemplate,
        ext: &str,
        seed: u64,
    ) -> Self {
        let printable = format!(
            "[{}] {}({})->{}({})_{}_{}_{}",
            rule.id,
            final_action.name(),
            api.upper_name(),
            template.template,
            ext,
            payload,
            permission,
            seed
        );
        let hash = sha256_hex(&printable)[..CASE_HASH_LEN].to_string();
        TestCase {
            rule,
            final_action,
            api,
            payload,
            permission,
            template,
            ext: ext.to_string(),
            seed,
            printable,
            hash,
        }
    }

    /// Rebuilds a case from its printable form against `catalog`.
    ///
    /// # Errors
    /// Unknown rule, action or API identifiers and unparseable text are fatal.
    pub fn from_printable(text: &str, catalog: &Catalog) -> Result<Self, HarnessError> {
        let parsed = PrintableCase::parse(text)?;
        let rule = catalog.rule(&parsed.rule_id)?;
        let final_action: Action = parsed.final_action.parse()?;
        let api = catalog.api(&parsed.api)?;
        let template = rule.find_template(&parsed.template).ok_or_else(|| {
            HarnessError::MalformedCase(format!(
                "template {} is not produced by rule {}",
                parsed.template, rule.id
            ))
        })?;
        let mut steps = Vec::with_capacity(parsed.payload.len());
        for (step, api_name) in &parsed.payload {
            let step_api = catalog.api(api_name)?;
            if step == SETUP {
                steps.push(PayloadStep::setup(step_api));
            } else {
                steps.push(PayloadStep::act(step.parse()?, step_api));
            }
        }
        let permission = PermissionSetting::from_array(&parsed.permission)?;
        let case = TestCase::new(
            rule,
            final_action,
            api,
            Payload::new(steps),
            permission,
            template,
            &parsed.ext,
            parsed.seed,
        );
        if case.printable != text {
            return Err(HarnessError::MalformedCase(format!(
                "case does not round-trip: {} != {}",
                case.printable, text
            )));
        }
        Ok(case)
    }

    /// First 11 hex chars of SHA-256 over the printable form.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn printable(&self) -> &str {
        &self.printable
    }

    pub fn rule(&self) -> &Arc<SecurityRule> {
        &self.rule
    }

    pub fn final_action(&self) -> Action {
        self.final_action
    }

    pub fn api(&self) -> &Arc<StorageApi> {
        &self.api
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn permission(&self) -> PermissionSetting {
        self.permission
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `<template>(<ext>)_[<steps>]`, with the final action appended unless
    /// `prerequisite` is set.
    ///
    /// A length-N case's prerequisite feature equals the full feature of the
    /// length-(N-1) case whose final action is this case's last payload step.
    pub fn feature(&self, prerequisite: bool) -> String {
        let mut parts: Vec<String> = self.payload.steps().iter().map(PayloadStep::feature).collect();
        if !prerequisite {
            parts.push(format!("{}({})", self.final_action.flag(), self.api.upper_name()));
        }
        format!("{}({})_[{}]", self.template.template, self.ext, parts.join(", "))
    }

    /// Categorical features consumed by failure predictors.
    pub fn features(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.insert(format!("RULE:{}", self.rule.id));
        out.insert(format!("FINAL:{}", self.final_action.name()));
        out.insert(format!("API:{}", self.api.upper_name()));
        out.insert(format!("PERM:{}", self.permission));
        out.insert(format!("PATH:{}", self.template.template));
        out.insert(format!("EXT:{}", self.ext));
        out.insert(format!("PAYLOADS:{}", self.payload));
        out
    }

    /// Sort key used for execution order.
    pub fn order_key(&self) -> (usize, &str) {
        (self.payload.len(), &self.hash)
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for TestCase {}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.printable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(catalog: &Catalog, steps: Vec<PayloadStep>, action: Action) -> TestCase {
        let rule = catalog.rule("T1").unwrap();
        let template = rule.templates().remove(0);
        let api = catalog.file_api().unwrap();
        TestCase::new(rule.clone(), action, api, Payload::new(steps), rule.permissions[0], template, ".txt", 10)
    }

    #[test]
    fn printable_layout() {
        let catalog = Catalog::standard().unwrap();
        let file = catalog.file_api().unwrap();
        let c = sample(&catalog, vec![PayloadStep::setup(file)], Action::Overwrite);
        assert_eq!(
            c.printable(),
            "[T1] OVERWRITE(FILE)->/sdcard/Download/${p}_(.txt)_['SETUP,File']_[1, 1, 0, 1, 1]_10"
        );
        assert_eq!(c.hash().len(), CASE_HASH_LEN);
        assert_eq!(c.hash(), &sha256_hex(c.printable())[..CASE_HASH_LEN]);
    }

    #[test]
    fn prerequisite_feature_chains_to_shorter_case() {
        let catalog = Catalog::standard().unwrap();
        let file = catalog.file_api().unwrap();
        let short = sample(&catalog, vec![PayloadStep::setup(file.clone())], Action::Overwrite);
        let long = sample(
            &catalog,
            vec![PayloadStep::setup(file.clone()), PayloadStep::act(Action::Overwrite, file)],
            Action::Delete,
        );
        assert_eq!(long.feature(true), short.feature(false));
        assert_ne!(long.feature(false), short.feature(false));
    }

    #[test]
    fn setup_never_aliases_plain_create() {
        let catalog = Catalog::standard().unwrap();
        let file = catalog.file_api().unwrap();
        // Payload ending in SETUP must not chain to a case whose final action is CREATE.
        let create_case = sample(&catalog, vec![PayloadStep::act(Action::Delete, file.clone())], Action::Create);
        let after_setup = sample(
            &catalog,
            vec![PayloadStep::act(Action::Delete, file.clone()), PayloadStep::setup(file)],
            Action::Overwrite,
        );
        assert_ne!(after_setup.feature(true), create_case.feature(false));
    }

    #[test]
    fn from_printable_round_trips() {
        let catalog = Catalog::standard().unwrap();
        let file = catalog.file_api().unwrap();
        let ms = catalog.api("media-store@content-resolver@io-stream").unwrap();
        let c = sample(
            &catalog,
            vec![PayloadStep::act(Action::Rename, ms), PayloadStep::setup(file)],
            Action::Delete,
        );
        let back = TestCase::from_printable(c.printable(), &catalog).unwrap();
        assert_eq!(back.hash(), c.hash());
        assert_eq!(back.payload(), c.payload());
    }

    #[test]
    fn from_printable_rejects_unknown_rule() {
        let catalog = Catalog::standard().unwrap();
        let text = "[Q7] READ(FILE)->/sdcard/Download/${p}_(.txt)_['SETUP,File']_[1, 1, 1, 1, 1]_1";
        assert!(matches!(TestCase::from_printable(text, &catalog), Err(HarnessError::UnknownRule(_))));
    }

    #[test]
    fn features_cover_every_dimension() {
        let catalog = Catalog::standard().unwrap();
        let file = catalog.file_api().unwrap();
        let c = sample(&catalog, vec![PayloadStep::setup(file)], Action::Move);
        let prefixes: Vec<String> =
            c.features().iter().map(|f| f.split(':').next().unwrap().to_string()).collect();
        for p in ["RULE", "FINAL", "API", "PERM", "PATH", "EXT", "PAYLOADS"] {
            assert!(prefixes.iter().any(|x| x == p), "missing {}", p);
        }
    }
}
