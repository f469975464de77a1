//! Merged outcomes of finished campaigns.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::error::HarnessError;
use crate::verifier::state::{CampaignState, CaseRecord};

/// Case hash to its best recorded outcome.
pub type History = BTreeMap<String, CaseRecord>;

/// Histories loaded from a `finished/` directory.
#[derive(Debug, Clone, Default)]
pub struct Histories {
    /// Runs of this campaign under the default strategy (file name starts with the campaign name).
    pub core: History,
    /// Every finished run.
    pub full: History,
}

/// Keeps the record with the higher score.
pub fn merge_into(history: &mut History, hash: &str, record: &CaseRecord) {
    match history.get(hash) {
        Some(existing) if existing.score >= record.score => {}
        _ => {
            history.insert(hash.to_string(), record.clone());
        }
    }
}

/// Loads every finished campaign file under `finished_dir`.
///
/// Unreadable or malformed files are skipped with a warning. A missing directory
/// yields empty histories.
pub fn load(finished_dir: &Path, campaign: &str) -> Result<Histories, HarnessError> {
    let mut out = Histories::default();
    if !finished_dir.is_dir() {
        return Ok(out);
    }
    let mut entries: Vec<_> = fs::read_dir(finished_dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if !path.is_file() {
            continue;
        }
        let core = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(campaign))
            .unwrap_or(false);
        let state: CampaignState = match fs::read_to_string(&path)
            .map_err(HarnessError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(HarnessError::from))
        {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable history file");
                continue;
            }
        };
        info!(path = %path.display(), cases = state.cases.len(), core, "loaded historical results");
        for (hash, record) in &state.cases {
            merge_into(&mut out.full, hash, record);
            if core {
                merge_into(&mut out.core, hash, record);
            }
        }
    }
    Ok(out)
}
