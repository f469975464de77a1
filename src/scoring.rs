//! Severity scoring of executed cases.

use serde::{Deserialize, Serialize};

/// Penalty per payload step.
pub const LENGTH_PENALTY: f64 = 0.9;

/// Scores derived from one case's diff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Total differing attributes minus the length penalty, rounded to two decimals.
    pub severity: f64,
    /// Total differing attributes.
    pub strength: usize,
    /// Operations that did not contribute a differing attribute. Diagnostic only.
    pub useless_ops: i64,
}

impl Score {
    /// # Arguments
    /// * `diff_counts` - differing-attribute counts of every failing evaluation of the case
    /// * `payload_len` - number of payload steps
    pub fn compute(diff_counts: &[usize], payload_len: usize) -> Self {
        let strength: usize = diff_counts.iter().sum();
        Score {
            severity: severity(strength, payload_len),
            strength,
            useless_ops: (payload_len as i64 + 1) - strength as i64,
        }
    }

    pub fn is_violation(&self) -> bool {
        self.strength > 0
    }
}

pub fn severity(strength: usize, payload_len: usize) -> f64 {
    round2(strength as f64 - LENGTH_PENALTY * payload_len as f64)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
