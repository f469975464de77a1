//!
//! Post-campaign analysis.
//!
//! Categorizes every violation of a finished campaign file and produces the
//! category count table, the category index and the unknown cases left for
//! manual triage.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::categorize::{categorize, ViolationCategory};
use crate::error::HarnessError;
use crate::oracle::CaseDetail;
use crate::verifier::{CampaignState, CaseRecord, RunInfo};

pub const UNKNOWN_ROW: &str = "Unknown violation types";
pub const TOTAL_VIOLATIONS_ROW: &str = "Total violations";
pub const TOTAL_TESTS_ROW: &str = "Total tests";
/// Category index key of uncategorized violations.
pub const UNKNOWN_KEY: &str = "unknown";

/// Run info extended with unknown-violation statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInfo {
    #[serde(flatten)]
    pub run: RunInfo,
    pub unknown_failing_detail: BTreeMap<String, usize>,
    pub unknown_cases: usize,
    pub unknown_rate: String,
}

/// A violation no category matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownCase {
    /// Differing attribute count.
    pub score: usize,
    pub case: String,
    pub detail: CaseDetail,
}

/// A violation with its category label, `None` when unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedCase {
    #[serde(flatten)]
    pub record: CaseRecord,
    pub violation_type: Option<String>,
}

/// Everything derived from one finished campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// (row label, count), in table order.
    pub rows: Vec<(String, usize)>,
    pub info: AnalysisInfo,
    pub unknown: BTreeMap<String, UnknownCase>,
    pub analyzed: BTreeMap<String, AnalyzedCase>,
    /// Category label to sorted case hashes.
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Analysis {
    pub fn count(&self, row: &str) -> usize {
        self.rows.iter().find(|(name, _)| name == row).map(|(_, n)| *n).unwrap_or(0)
    }

    /// Two-column table, header first.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("violation types,counts\n");
        for (name, count) in &self.rows {
            out.push_str(&format!("{},{}\n", name, count));
        }
        out
    }
}

/// Categorizes every violated case of `state`.
pub fn analyze(state: &CampaignState) -> Analysis {
    let mut counts: BTreeMap<String, usize> =
        ViolationCategory::all().iter().map(|c| (c.label(), 0)).collect();
    let mut unknown_rows = 0usize;
    let mut total_violations = 0usize;
    let mut unknown: BTreeMap<String, UnknownCase> = BTreeMap::new();
    let mut unknown_failing_detail: BTreeMap<String, usize> = BTreeMap::new();
    let mut analyzed: BTreeMap<String, AnalyzedCase> = BTreeMap::new();
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (hash, record) in &state.cases {
        if !record.violated() {
            continue;
        }
        total_violations += 1;
        let category = categorize(&record.case, &record.detail, &record.prerequisites);
        let label = category.map(|c| c.label());
        analyzed.insert(hash.clone(), AnalyzedCase { record: record.clone(), violation_type: label.clone() });
        categories.entry(label.clone().unwrap_or_else(|| UNKNOWN_KEY.to_string())).or_default().push(hash.clone());

        match label {
            Some(label) => *counts.entry(label).or_default() += 1,
            None => {
                unknown_rows += 1;
                *unknown_failing_detail.entry(record.rule_id().to_string()).or_default() += 1;
                if record.detail.diff_attr_count > 0 {
                    unknown.insert(
                        hash.clone(),
                        UnknownCase {
                            score: record.detail.diff_attr_count,
                            case: record.case.clone(),
                            detail: record.detail.clone(),
                        },
                    );
                }
            }
        }
    }
    for hashes in categories.values_mut() {
        hashes.sort();
    }

    let mut rows: Vec<(String, usize)> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));
    rows.push((UNKNOWN_ROW.to_string(), unknown_rows));
    rows.push((TOTAL_VIOLATIONS_ROW.to_string(), total_violations));
    rows.push((TOTAL_TESTS_ROW.to_string(), state.cases.len()));

    let unknown_rate = if state.cases.is_empty() {
        "0.00%".to_string()
    } else {
        format!("{:.2}%", unknown.len() as f64 / state.cases.len() as f64 * 100.0)
    };
    let info = AnalysisInfo {
        run: state.info.clone(),
        unknown_failing_detail,
        unknown_cases: unknown.len(),
        unknown_rate,
    };
    Analysis { rows, info, unknown, analyzed, categories }
}

#[derive(Serialize)]
struct Filtered<'a> {
    info: &'a AnalysisInfo,
    unknown_cases: &'a BTreeMap<String, UnknownCase>,
}

#[derive(Serialize)]
struct Analyzed<'a> {
    info: &'a RunInfo,
    analyzed_cases: &'a BTreeMap<String, AnalyzedCase>,
}

/// Output directories of a campaign's analysis, recreated on every pass.
const OUTPUT_DIRS: [&str; 4] = ["reports", "filtered", "analyzed", "categorized"];

/// Analyzes every finished file of the campaign at `campaign_dir`.
///
/// Writes `reports/<name>.csv`, `filtered/<name>.json` (unknown cases),
/// `analyzed/<name>.json` and `categorized/<name>.json`. Unreadable files are skipped.
pub fn analyze_campaign_dir(campaign_dir: &Path) -> Result<Vec<(PathBuf, Analysis)>, HarnessError> {
    let finished = campaign_dir.join("finished");
    if !finished.is_dir() {
        return Err(HarnessError::Config(format!("{} has no finished campaigns", campaign_dir.display())));
    }
    for dir in OUTPUT_DIRS {
        let path = campaign_dir.join(dir);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
    }

    let mut files: Vec<PathBuf> = fs::read_dir(&finished)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    files.sort();

    let mut out = Vec::new();
    for path in files {
        let state: CampaignState = match fs::read_to_string(&path)
            .map_err(HarnessError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(HarnessError::from))
        {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable campaign file");
                continue;
            }
        };
        let analysis = analyze(&state);
        let Some(name) = path.file_name() else { continue };
        let csv_name = PathBuf::from(name).with_extension("csv");

        fs::write(campaign_dir.join("reports").join(csv_name), analysis.to_csv())?;
        let filtered = Filtered { info: &analysis.info, unknown_cases: &analysis.unknown };
        fs::write(campaign_dir.join("filtered").join(name), serde_json::to_string_pretty(&filtered)?)?;
        let analyzed = Analyzed { info: &state.info, analyzed_cases: &analysis.analyzed };
        fs::write(campaign_dir.join("analyzed").join(name), serde_json::to_string_pretty(&analyzed)?)?;
        fs::write(campaign_dir.join("categorized").join(name), serde_json::to_string_pretty(&analysis.categories)?)?;

        info!(
            path = %path.display(),
            violations = analysis.count(TOTAL_VIOLATIONS_ROW),
            unknown = analysis.count(UNKNOWN_ROW),
            "campaign analyzed"
        );
        out.push((path, analysis));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Evidence, Feedback, Observation, Replacements};
    use crate::permissions::PermissionSetting;
    use crate::types::RuleType;
    use std::collections::BTreeSet;

    fn record(case: &str, evidence: Evidence, diff: &[&str]) -> CaseRecord {
        CaseRecord {
            score: diff.len() as f64 - 0.9,
            strength: diff.len(),
            prerequisites: BTreeMap::new(),
            case: case.to_string(),
            time_spent: 2.0,
            detail: CaseDetail {
                rule_type: RuleType::from_rule_id(&case[1..3]).unwrap(),
                rule_id: case[1..3].to_string(),
                final_action: String::new(),
                permission: PermissionSetting::ALL.to_printable(),
                payload: vec!["SETUP,File".into()],
                reproduce: vec![],
                replacement: Replacements::new(),
                evidence,
                diff_attr_count: diff.len(),
                diff_elements: diff.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            },
        }
    }

    fn at(target: &str) -> Feedback {
        Feedback::Direct(Observation { target: Some(target.into()), ..Default::default() })
    }

    fn state() -> CampaignState {
        let mut state = CampaignState::default();
        state.record(
            "aaaaaaaaaaa",
            record(
                "[C2] READ(FILE)->/sdcard/Download/${p}_(.txt)_['SETUP,File']_[1, 1, 1, 1, 1]_10",
                Evidence::Confidentiality {
                    result_on_exist_file: at("/sdcard/Download/storage_verifier_alpha_x.txt"),
                    result_on_non_exist_file: at("/sdcard/Download/storage_verifier_alpha_x.txt"),
                },
                &["success", "content"],
            ),
        );
        state.record(
            "bbbbbbbbbbb",
            record(
                "[C1] READ(FILE)->/sdcard/Android/data/${p}/(.txt)_['SETUP,File']_[1, 1, 1, 1, 1]_10",
                Evidence::Confidentiality {
                    result_on_exist_file: at("/data/data/x"),
                    result_on_non_exist_file: at("/data/data/x"),
                },
                &["size"],
            ),
        );
        state.record(
            "ccccccccccc",
            record(
                "[C1] READ(FILE)->/sdcard/Android/data/${p}/(.txt)_['SETUP,File']_[1, 1, 1, 1, 1]_11",
                Evidence::Confidentiality { result_on_exist_file: at("/x"), result_on_non_exist_file: at("/x") },
                &[],
            ),
        );
        state.refresh_info(None);
        state
    }

    #[test]
    fn table_counts_categories_and_unknowns() {
        let analysis = analyze(&state());
        assert_eq!(analysis.count("Download leak (all file access)"), 1);
        assert_eq!(analysis.count(UNKNOWN_ROW), 1);
        assert_eq!(analysis.count(TOTAL_VIOLATIONS_ROW), 2);
        assert_eq!(analysis.count(TOTAL_TESTS_ROW), 3);
        assert_eq!(analysis.categories[UNKNOWN_KEY], vec!["bbbbbbbbbbb".to_string()]);
        assert_eq!(analysis.info.unknown_failing_detail.get("C1"), Some(&1));
        assert_eq!(analysis.info.unknown_rate, "33.33%");
        assert_eq!(analysis.analyzed.len(), 2);
    }

    #[test]
    fn categorizable_rows_sorted_descending_with_totals_last() {
        let analysis = analyze(&state());
        let names: Vec<&str> = analysis.rows.iter().map(|(n, _)| n.as_str()).collect();
        let (sorted_part, tail) = names.split_at(names.len() - 3);
        let mut expected = sorted_part.to_vec();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(sorted_part, expected.as_slice());
        assert_eq!(tail, [UNKNOWN_ROW, TOTAL_VIOLATIONS_ROW, TOTAL_TESTS_ROW]);
        assert!(analysis.to_csv().starts_with("violation types,counts\n"));
    }

    #[test]
    fn campaign_dir_outputs_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let finished = dir.path().join("finished");
        fs::create_dir_all(&finished).unwrap();
        fs::write(finished.join("camp_2024-03-01.json"), serde_json::to_string(&state()).unwrap()).unwrap();
        fs::write(finished.join("camp_bad.json"), "[]").unwrap();

        let results = analyze_campaign_dir(dir.path()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(dir.path().join("reports/camp_2024-03-01.csv").is_file());
        let categorized: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("categorized/camp_2024-03-01.json")).unwrap())
                .unwrap();
        assert_eq!(categorized["Download leak (all file access)"], vec!["aaaaaaaaaaa".to_string()]);
    }
}
