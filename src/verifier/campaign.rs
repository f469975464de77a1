//!
//! The campaign loop: plan, execute, score, persist, archive.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::capability::Catalog;
use crate::categorize::PrerequisiteRecord;
use crate::config::RunConfig;
use crate::error::HarnessError;
use crate::generator::{CaseGenerator, GeneratedCases};
use crate::oracle::{Device, Oracle};
use crate::sampling::predictor::NaiveBayesPredictor;
use crate::sampling::{DeterministicShuffle, Plan, SampleMode, Sampler, SamplingStrategy, WeightedSelection};
use crate::scoring::Score;
use crate::verifier::history::{self, History};
use crate::verifier::state::{self, time_str, CampaignPaths, CampaignState, CaseRecord};

/// How a call to [`Verifier::verify`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every planned case has a record; the campaign file was moved here.
    Archived(PathBuf),
    /// The plan still has cases without a record.
    Incomplete { tested: usize, total: usize },
    /// Sampling selected no case.
    NothingToTest,
}

/// Picks the ordering strategy for a run.
///
/// Explicitly requested cases always use the seeded shuffle.
pub fn strategy_for(
    config: &RunConfig,
    generated: &GeneratedCases,
    full_history: &History,
) -> Box<dyn SamplingStrategy> {
    if config.sample_mode == SampleMode::Random || !config.only_cases.is_empty() {
        return Box::new(DeterministicShuffle { seed: config.seed });
    }
    let predictor = NaiveBayesPredictor::train(generated.iter(), full_history);
    Box::new(WeightedSelection::new(predictor, config.sample_mode))
}

/// Drives a campaign's cases through the oracle, one at a time.
pub struct Verifier<'a, D: Device> {
    catalog: &'a Catalog,
    config: RunConfig,
    oracle: Oracle<D>,
    paths: CampaignPaths,
    launched: Option<Instant>,
}

impl<'a, D: Device> Verifier<'a, D> {
    pub fn new(catalog: &'a Catalog, config: RunConfig, oracle: Oracle<D>) -> Result<Self, HarnessError> {
        config.validate(catalog)?;
        let paths = CampaignPaths::new(&config.results_dir, &config.campaign, config.sample_mode);
        Ok(Verifier { catalog, config, oracle, paths, launched: None })
    }

    pub fn paths(&self) -> &CampaignPaths {
        &self.paths
    }

    pub fn oracle(&self) -> &Oracle<D> {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut Oracle<D> {
        &mut self.oracle
    }

    pub fn into_oracle(self) -> Oracle<D> {
        self.oracle
    }

    fn save(&self, state: &mut CampaignState, est_left: Option<f64>) -> Result<Option<PathBuf>, HarnessError> {
        state::save(&self.paths, state, est_left, chrono::Local::now().date_naive())
    }

    /// Generates and samples the campaign's cases without executing anything.
    pub fn plan(&mut self) -> Result<(GeneratedCases, Plan), HarnessError> {
        let has_root = self.oracle.has_root();
        let histories = history::load(&self.paths.finished_dir, &self.paths.campaign)?;
        self.plan_with(has_root, &histories.core, &histories.full)
    }

    fn plan_with(
        &self,
        has_root: bool,
        core: &History,
        full: &History,
    ) -> Result<(GeneratedCases, Plan), HarnessError> {
        let generated = CaseGenerator::new(self.catalog, self.config.generator_config())?.generate();
        let strategy = strategy_for(&self.config, &generated, full);
        let sampler = Sampler::new(self.catalog, self.config.sampler_config());
        let plan = sampler.plan(&generated, strategy.as_ref(), core, full, &self.config.only_cases, has_root)?;
        Ok((generated, plan))
    }

    /// Runs (or resumes) the campaign until every planned case has a record.
    ///
    /// # Errors
    /// Transport failures, missing reference observations and unmet prerequisites
    /// abort the run. Progress recorded so far is saved first.
    pub fn verify(&mut self) -> Result<RunOutcome, HarnessError> {
        self.paths.ensure_dirs()?;
        let mut state = state::load(&self.paths)?;
        if state.is_complete() {
            info!("loaded campaign is already complete");
            return Ok(match self.save(&mut state, None)? {
                Some(path) => RunOutcome::Archived(path),
                None => RunOutcome::Incomplete { tested: state.cases.len(), total: state.info.total_cases },
            });
        }

        let has_root = self.oracle.has_root();
        let histories = history::load(&self.paths.finished_dir, &self.paths.campaign)?;
        let (generated, plan) = self.plan_with(has_root, &histories.core, &histories.full)?;

        let total = plan.cases.len();
        state.info.total_cases = total;
        state.info.experiment_hash = plan.experiment_hash.clone();

        let dropped = state.retain_planned(&plan.hashes());
        if dropped > 0 && !state.cases.is_empty() {
            info!(dropped, "cleaned records outside the plan, saving progress");
            if let Some(path) = self.save(&mut state, None)? {
                return Ok(RunOutcome::Archived(path));
            }
        }
        if total == 0 {
            warn!("no case to test");
            return Ok(RunOutcome::NothingToTest);
        }

        let mut executed = 0usize;
        let mut violations = 0usize;
        for case in &plan.cases {
            let hash = case.hash();
            if let Some(record) = state.cases.get(hash) {
                violations += usize::from(record.violated());
                debug!(case = %hash, "case already tested, skipping");
                continue;
            }
            if self.config.reuse_results {
                if let Some(record) = histories.full.get(hash) {
                    violations += usize::from(record.violated());
                    state.record(hash, record.clone());
                    debug!(case = %hash, "reusing recorded outcome from history");
                    continue;
                }
            }

            let launched = match self.launched {
                Some(t) => t,
                None => {
                    self.oracle.install_apps()?;
                    let now = Instant::now();
                    self.launched = Some(now);
                    now
                }
            };

            let required = generated.prerequisites.dependency_hashes(case);
            for dep in &required {
                if !state.cases.contains_key(dep) {
                    error!(case = %hash, prerequisite = %dep, "prerequisite not met, terminating");
                    self.save(&mut state, None)?;
                    return Err(HarnessError::UnmetPrerequisite {
                        case: hash.to_string(),
                        prerequisite: dep.clone(),
                    });
                }
            }

            info!(
                case = %hash,
                rule = %case.rule().id,
                template = %case.template().template,
                ext = %case.ext(),
                permission = %case.permission(),
                prerequisites = ?required,
                "testing case"
            );
            let started = Instant::now();
            let outcome = match self.oracle.perform(case) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(case = %hash, error = %e, "case aborted the run");
                    if !state.cases.is_empty() {
                        self.save(&mut state, None)?;
                    }
                    return Err(e);
                }
            };
            let spent = started.elapsed().as_secs_f64();
            executed += 1;

            let counts = if outcome.passed { Vec::new() } else { vec![outcome.detail.diff_attr_count] };
            let score = Score::compute(&counts, case.payload().len());
            if score.is_violation() {
                violations += 1;
                debug!(detail = ?outcome.detail, "violation detail");
            }

            let prerequisites: BTreeMap<String, PrerequisiteRecord> = required
                .iter()
                .filter_map(|dep| state.cases.get(dep).map(|r| (dep, r)))
                .map(|(dep, r)| {
                    (dep.clone(), PrerequisiteRecord { score: r.score, case: r.case.clone(), violated: r.violated() })
                })
                .collect();
            state.record(
                hash,
                CaseRecord {
                    score: score.severity,
                    strength: score.strength,
                    prerequisites,
                    case: case.printable().to_string(),
                    time_spent: spent,
                    detail: outcome.detail,
                },
            );

            let elapsed = launched.elapsed().as_secs_f64();
            let avg = elapsed / executed as f64;
            let est_left = avg * total.saturating_sub(state.cases.len()) as f64;
            info!(
                case = %hash,
                score = score.severity,
                useless_ops = score.useless_ops,
                spent = %format!("{:.1}s", spent),
                avg = %format!("{:.1}s", avg),
                total_spent = %time_str(elapsed),
                est_left = %time_str(est_left),
                violations,
                "case finished"
            );
            if let Some(path) = self.save(&mut state, Some(est_left))? {
                return Ok(RunOutcome::Archived(path));
            }
        }

        if executed == 0 {
            info!("no new case executed");
        }
        Ok(match self.save(&mut state, None)? {
            Some(path) => RunOutcome::Archived(path),
            None => RunOutcome::Incomplete { tested: state.cases.len(), total },
        })
    }
}
