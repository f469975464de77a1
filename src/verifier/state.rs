//!
//! Persisted campaign state.
//!
//! One JSON document per running campaign: run info plus one record per executed
//! case. The document is rewritten after every case (temp file, then rename) with
//! cases ordered by descending score, and moved under `finished/` once every
//! planned case has a record.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, info};

use crate::categorize::PrerequisiteRecord;
use crate::error::HarnessError;
use crate::oracle::CaseDetail;
use crate::sampling::SampleMode;

/// Highest sequence suffix tried when an archive name is taken.
pub const MAX_ARCHIVE_SUFFIX: usize = 100;

/// Result of one executed case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    /// Severity score.
    pub score: f64,
    /// Total differing attributes; positive iff the case violated its rule.
    #[serde(default)]
    pub strength: usize,
    /// Outcomes of the direct dependencies at the time this case ran.
    #[serde(default)]
    pub prerequisites: BTreeMap<String, PrerequisiteRecord>,
    /// Printable case.
    pub case: String,
    /// Seconds spent executing the case.
    #[serde(default)]
    pub time_spent: f64,
    pub detail: CaseDetail,
}

impl CaseRecord {
    pub fn violated(&self) -> bool {
        self.strength > 0
    }

    /// Rule id taken from the printable case, e.g. `C2`.
    pub fn rule_id(&self) -> &str {
        self.case.get(1..3).unwrap_or("")
    }
}

/// Summary block of a campaign file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub total_cases: usize,
    pub tested_cases: usize,
    pub failed_cases: usize,
    pub fail_rate: String,
    pub progress: String,
    pub max_score: f64,
    #[serde(default)]
    pub applied_rules: BTreeMap<String, usize>,
    #[serde(default)]
    pub failing_detail: BTreeMap<String, usize>,
    #[serde(default)]
    pub experiment_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub est_time_left: Option<String>,
}

/// In-memory campaign document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignState {
    pub info: RunInfo,
    #[serde(serialize_with = "by_descending_score")]
    pub cases: BTreeMap<String, CaseRecord>,
}

fn by_descending_score<S: Serializer>(cases: &BTreeMap<String, CaseRecord>, s: S) -> Result<S::Ok, S::Error> {
    let mut ordered: Vec<(&String, &CaseRecord)> = cases.iter().collect();
    ordered.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then_with(|| a.0.cmp(b.0)));
    let mut map = s.serialize_map(Some(ordered.len()))?;
    for (hash, record) in ordered {
        map.serialize_entry(hash, record)?;
    }
    map.end()
}

fn percent(part: usize, whole: usize) -> String {
    if whole == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", part as f64 / whole as f64 * 100.0)
}

/// `m:ss` rendering of a duration in seconds.
pub fn time_str(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

impl CampaignState {
    pub fn is_complete(&self) -> bool {
        self.info.total_cases > 0 && self.cases.len() >= self.info.total_cases
    }

    pub fn record(&mut self, hash: &str, record: CaseRecord) {
        self.cases.insert(hash.to_string(), record);
    }

    /// Recomputes every derived field of the run info from the case records.
    pub fn refresh_info(&mut self, est_left: Option<f64>) {
        let mut applied: BTreeMap<String, usize> = BTreeMap::new();
        let mut failing: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.cases.values() {
            *applied.entry(record.rule_id().to_string()).or_default() += 1;
            if record.violated() {
                *failing.entry(record.rule_id().to_string()).or_default() += 1;
            }
        }
        let info = &mut self.info;
        info.tested_cases = self.cases.len();
        info.failed_cases = failing.values().sum();
        info.applied_rules = applied;
        info.failing_detail = failing;
        info.progress = percent(info.tested_cases, info.total_cases);
        info.fail_rate = percent(info.failed_cases, info.tested_cases);
        info.max_score = self.cases.values().map(|r| r.score).fold(0.0, f64::max);
        info.est_time_left = est_left.filter(|s| *s > 0.0).map(time_str);
    }

    /// Drops records of cases that are not part of the current plan.
    ///
    /// Returns how many records were dropped.
    pub fn retain_planned(&mut self, planned: &BTreeSet<String>) -> usize {
        let before = self.cases.len();
        self.cases.retain(|hash, _| planned.contains(hash));
        before - self.cases.len()
    }
}

/// File locations of one campaign.
#[derive(Debug, Clone)]
pub struct CampaignPaths {
    pub campaign: String,
    pub results_dir: PathBuf,
    pub finished_dir: PathBuf,
    pub testing_file: PathBuf,
    prefix: &'static str,
}

impl CampaignPaths {
    /// `<results>/<campaign>/<prefix><campaign>_testing.json`.
    pub fn new(results_root: &Path, campaign: &str, mode: SampleMode) -> Self {
        let results_dir = results_root.join(campaign);
        let finished_dir = results_dir.join("finished");
        let prefix = mode.file_prefix();
        let testing_file = results_dir.join(format!("{}{}_testing.json", prefix, campaign));
        CampaignPaths { campaign: campaign.to_string(), results_dir, finished_dir, testing_file, prefix }
    }

    pub fn ensure_dirs(&self) -> Result<(), HarnessError> {
        fs::create_dir_all(&self.finished_dir)?;
        Ok(())
    }

    /// First free archive path for `date`.
    ///
    /// # Errors
    /// `HarnessError::Config` when every suffix up to `MAX_ARCHIVE_SUFFIX` is taken.
    pub fn archive_path(&self, date: NaiveDate) -> Result<PathBuf, HarnessError> {
        let stem = format!("{}{}_{}", self.prefix, self.campaign, date.format("%Y-%m-%d"));
        let first = self.finished_dir.join(format!("{}.json", stem));
        if !first.exists() {
            return Ok(first);
        }
        for n in 1..=MAX_ARCHIVE_SUFFIX {
            let candidate = self.finished_dir.join(format!("{}_{}.json", stem, n));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        error!(stem = %stem, "too many archives with the same name");
        Err(HarnessError::Config(format!("no free archive name for {}", stem)))
    }
}

/// Reads the in-progress file, or starts a fresh state.
pub fn load(paths: &CampaignPaths) -> Result<CampaignState, HarnessError> {
    if !paths.testing_file.is_file() {
        info!("initialized progress");
        let info = RunInfo { fail_rate: percent(0, 0), progress: percent(0, 0), ..Default::default() };
        return Ok(CampaignState { info, cases: BTreeMap::new() });
    }
    let raw = fs::read_to_string(&paths.testing_file)?;
    let state: CampaignState = serde_json::from_str(&raw)?;
    info!(path = %paths.testing_file.display(), cases = state.cases.len(), "loaded progress");
    Ok(state)
}

/// Atomically rewrites the in-progress file. Once the campaign is complete the file
/// is moved to the archive and its new path returned.
pub fn save(
    paths: &CampaignPaths,
    state: &mut CampaignState,
    est_left: Option<f64>,
    today: NaiveDate,
) -> Result<Option<PathBuf>, HarnessError> {
    fs::create_dir_all(&paths.results_dir)?;
    state.refresh_info(est_left);

    let mut tmp = paths.testing_file.clone().into_os_string();
    tmp.push("_bak");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    fs::rename(&tmp, &paths.testing_file)?;
    info!(path = %paths.testing_file.display(), "saved progress");

    if !state.is_complete() {
        return Ok(None);
    }
    fs::create_dir_all(&paths.finished_dir)?;
    let archive = paths.archive_path(today)?;
    fs::rename(&paths.testing_file, &archive)?;
    info!(path = %archive.display(), "all cases tested, campaign archived");
    Ok(Some(archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Evidence, Feedback, Replacements};
    use crate::types::RuleType;

    fn record(case: &str, score: f64, strength: usize) -> CaseRecord {
        CaseRecord {
            score,
            strength,
            prerequisites: BTreeMap::new(),
            case: case.to_string(),
            time_spent: 1.0,
            detail: CaseDetail {
                rule_type: RuleType::Confidentiality,
                rule_id: case.get(1..3).unwrap_or("").to_string(),
                final_action: "READ_FILE".into(),
                permission: BTreeMap::new(),
                payload: vec![],
                reproduce: vec![],
                replacement: Replacements::new(),
                evidence: Evidence::Confidentiality {
                    result_on_exist_file: Feedback::default(),
                    result_on_non_exist_file: Feedback::default(),
                },
                diff_attr_count: strength,
                diff_elements: BTreeSet::new(),
            },
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn info_counts_and_rates() {
        let mut state = CampaignState::default();
        state.info.total_cases = 4;
        state.record("a", record("[C2] x", 0.1, 1));
        state.record("b", record("[C2] y", -0.9, 0));
        state.record("c", record("[T1] z", 1.1, 2));
        state.refresh_info(Some(75.0));
        assert_eq!(state.info.tested_cases, 3);
        assert_eq!(state.info.failed_cases, 2);
        assert_eq!(state.info.progress, "75.00%");
        assert_eq!(state.info.fail_rate, "66.67%");
        assert_eq!(state.info.max_score, 1.1);
        assert_eq!(state.info.applied_rules.get("C2"), Some(&2));
        assert_eq!(state.info.failing_detail.get("T1"), Some(&1));
        assert_eq!(state.info.est_time_left.as_deref(), Some("1:15"));
    }

    #[test]
    fn saved_cases_are_ordered_by_score() {
        let mut state = CampaignState::default();
        state.info.total_cases = 10;
        state.record("aaa", record("[C2] x", -0.9, 0));
        state.record("bbb", record("[C2] y", 1.1, 2));
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.find("\"bbb\"").unwrap() < json.find("\"aaa\"").unwrap());
        let back: CampaignState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cases.len(), 2);
    }

    #[test]
    fn completed_campaign_is_archived_with_sequence_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CampaignPaths::new(dir.path(), "scoped", SampleMode::Extensive);
        paths.ensure_dirs().unwrap();
        assert!(paths.testing_file.ends_with("ext_scoped_testing.json"));

        let mut state = CampaignState::default();
        state.info.total_cases = 1;
        state.record("a", record("[C2] x", 0.1, 1));
        let first = save(&paths, &mut state, None, date()).unwrap().unwrap();
        assert!(first.ends_with("finished/ext_scoped_2024-03-01.json"));
        assert!(!paths.testing_file.exists());

        let second = save(&paths, &mut state, None, date()).unwrap().unwrap();
        assert!(second.ends_with("finished/ext_scoped_2024-03-01_1.json"));
    }

    #[test]
    fn partial_campaign_stays_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CampaignPaths::new(dir.path(), "scoped", SampleMode::Random);
        let mut state = CampaignState::default();
        state.info.total_cases = 2;
        state.record("a", record("[C2] x", 0.1, 1));
        assert_eq!(save(&paths, &mut state, Some(3.0), date()).unwrap(), None);
        let loaded = load(&paths).unwrap();
        assert_eq!(loaded.cases.len(), 1);
        assert_eq!(loaded.info.est_time_left.as_deref(), Some("0:03"));
    }

    #[test]
    fn retain_planned_drops_stale_records() {
        let mut state = CampaignState::default();
        state.record("a", record("[C2] x", 0.1, 1));
        state.record("b", record("[C2] y", 0.1, 1));
        let planned: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        assert_eq!(state.retain_planned(&planned), 1);
        assert!(state.cases.contains_key("a"));
    }
}
