//! Run parameters of a verification campaign.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::capability::Catalog;
use crate::error::HarnessError;
use crate::generator::GeneratorConfig;
use crate::oracle::RetryPolicy;
use crate::sampling::{SampleMode, SamplerConfig};

/// Campaign configuration, read from JSON. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Campaign name; results go to `<results_dir>/<campaign>/`.
    ///
    /// Default: `scoped_storage`
    pub campaign: String,

    /// Root of every campaign's result directory.
    ///
    /// Default: `results`
    pub results_dir: PathBuf,

    /// Device selector handed to the device collaborator (e.g. a serial number).
    pub device: Option<String>,

    /// Baseline minimum case count per rule.
    ///
    /// Default: 61
    pub min_cases_per_rule: usize,

    /// Scale each rule's minimum by its share of the candidate space.
    ///
    /// Default: true
    pub proportional_quota: bool,

    /// Attacker steps around the setup step. Must be positive.
    ///
    /// Default: 1
    pub max_payload_length: usize,

    /// Global cap on selected cases. Quotas take precedence.
    pub max_cases: Option<usize>,

    pub sample_mode: SampleMode,

    /// Experiment seed baked into every case identity.
    ///
    /// Default: 10
    pub seed: u64,

    /// Copy outcomes of already-recorded cases from history instead of re-running them.
    pub reuse_results: bool,

    /// Restrict the campaign to these case hashes (plus their prerequisites).
    pub only_cases: Vec<String>,

    pub disabled_rules: BTreeSet<String>,

    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            campaign: "scoped_storage".to_string(),
            results_dir: PathBuf::from("results"),
            device: None,
            min_cases_per_rule: 61,
            proportional_quota: true,
            max_payload_length: 1,
            max_cases: None,
            sample_mode: SampleMode::Random,
            seed: 10,
            reuse_results: false,
            only_cases: Vec::new(),
            disabled_rules: BTreeSet::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let raw = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Checks parameter ranges and that every disabled rule exists.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), HarnessError> {
        if self.campaign.is_empty() || self.campaign.contains(['/', '\\']) {
            return Err(HarnessError::Config(format!("invalid campaign name {:?}", self.campaign)));
        }
        if self.max_payload_length == 0 {
            return Err(HarnessError::Config("payload length should be greater than 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(HarnessError::Config("retry attempts should be greater than 0".into()));
        }
        for id in &self.disabled_rules {
            catalog.rule(id)?;
        }
        Ok(())
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            max_payload_length: self.max_payload_length,
            seed: self.seed,
            disabled_rules: self.disabled_rules.clone(),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            average_min_cases: self.min_cases_per_rule,
            proportional_quota: self.proportional_quota,
            max_cases: self.max_cases,
            max_payload_length: self.max_payload_length,
        }
    }
}
