//! Failure-likelihood predictors used by weighted sampling.

use std::collections::{BTreeMap, BTreeSet};

use crate::case::TestCase;
use crate::verifier::history::History;

/// Scores a case's categorical features with a failure likelihood in `[0, 1]`.
pub trait FailurePredictor {
    fn predict(&self, features: &BTreeSet<String>) -> f64;
}

/// Assigns the same likelihood to every case; ordering then falls back to hashes.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPredictor(pub f64);

impl FailurePredictor for ConstantPredictor {
    fn predict(&self, _features: &BTreeSet<String>) -> f64 {
        self.0
    }
}

/// Bernoulli naive Bayes over case features with Laplace smoothing, trained from
/// recorded outcomes of previously executed cases.
#[derive(Debug, Clone, Default)]
pub struct NaiveBayesPredictor {
    violated: usize,
    passed: usize,
    /// feature -> (count among violated, count among passed)
    counts: BTreeMap<String, (usize, usize)>,
}

impl NaiveBayesPredictor {
    /// Trains on every case in `cases` that has a recorded outcome in `history`.
    pub fn train<'a>(cases: impl IntoIterator<Item = &'a TestCase>, history: &History) -> Self {
        let mut model = NaiveBayesPredictor::default();
        for case in cases {
            let Some(record) = history.get(case.hash()) else {
                continue;
            };
            let violated = record.violated();
            if violated {
                model.violated += 1;
            } else {
                model.passed += 1;
            }
            for feature in case.features() {
                let entry = model.counts.entry(feature).or_insert((0, 0));
                if violated {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
            }
        }
        tracing::info!(
            trained = model.samples(),
            violated = model.violated,
            features = model.counts.len(),
            "failure predictor trained"
        );
        model
    }

    pub fn samples(&self) -> usize {
        self.violated + self.passed
    }
}

impl FailurePredictor for NaiveBayesPredictor {
    fn predict(&self, features: &BTreeSet<String>) -> f64 {
        let pos = self.violated as f64;
        let neg = self.passed as f64;
        let mut log_odds = ((pos + 1.0) / (neg + 1.0)).ln();
        for feature in features {
            // Features never seen in training carry no evidence.
            if let Some((p, n)) = self.counts.get(feature) {
                let p_given_pos = (*p as f64 + 1.0) / (pos + 2.0);
                let p_given_neg = (*n as f64 + 1.0) / (neg + 2.0);
                log_odds += (p_given_pos / p_given_neg).ln();
            }
        }
        1.0 / (1.0 + (-log_odds).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn untrained_model_is_neutral() {
        let model = NaiveBayesPredictor::default();
        let p = model.predict(&features(&["RULE:T1", "API:FILE"]));
        assert!((p - 0.5).abs() < 1e-9);
    }

    #[test]
    fn learned_features_shift_likelihood() {
        let mut model = NaiveBayesPredictor { violated: 4, passed: 4, ..Default::default() };
        model.counts.insert("API:FILE".into(), (4, 0));
        model.counts.insert("API:SAF".into(), (0, 4));
        let risky = model.predict(&features(&["API:FILE"]));
        let safe = model.predict(&features(&["API:SAF"]));
        assert!(risky > 0.5 && safe < 0.5);
        assert!((0.0..=1.0).contains(&risky));
    }
}
