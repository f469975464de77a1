//!
//! Violation categorization.
//!
//! Maps a violating case to a named bug class through ordered decision tables,
//! one per rule type. Tables are evaluated top to bottom and the first matching
//! entry wins; a violation no entry matches is unknown and kept for manual triage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::case::PrintableCase;
use crate::oracle::{CaseDetail, Evidence, Feedback};
use crate::permissions::AppPermission;
use crate::types::RuleType;

const APP_SPECIFIC_PREFIX: &str = "/sdcard/Android/data/";
const SHARED_DOWNLOAD_MARK: &str = "sdcard/Download/";
const APP_SPECIFIC_MARK: &str = "sdcard/Android/data";
const PERMISSION_DENIED: &str = "EACCES (Permission denied)";
static AUTO_RENAME: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[a-z]{3} \([0-9]+\)").ok());

/// Action a loophole category is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoopholeAction {
    Move,
    Create,
    Overwrite,
    Delete,
    Rename,
    Other,
}

impl LoopholeAction {
    fn parse(name: &str, allowed: &[LoopholeAction]) -> Self {
        let action = match name {
            "MOVE" => LoopholeAction::Move,
            "CREATE" => LoopholeAction::Create,
            "OVERWRITE" => LoopholeAction::Overwrite,
            "DELETE" => LoopholeAction::Delete,
            "RENAME" => LoopholeAction::Rename,
            _ => LoopholeAction::Other,
        };
        if allowed.contains(&action) {
            action
        } else {
            LoopholeAction::Other
        }
    }

    fn name(self) -> &'static str {
        match self {
            LoopholeAction::Move => "MOVE",
            LoopholeAction::Create => "CREATE",
            LoopholeAction::Overwrite => "OVERWRITE",
            LoopholeAction::Delete => "DELETE",
            LoopholeAction::Rename => "RENAME",
            LoopholeAction::Other => "OTHER",
        }
    }
}

const INTEGRITY_ACTIONS: [LoopholeAction; 5] = [
    LoopholeAction::Move,
    LoopholeAction::Create,
    LoopholeAction::Overwrite,
    LoopholeAction::Delete,
    LoopholeAction::Rename,
];
const CONFIDENTIALITY_ACTIONS: [LoopholeAction; 4] =
    [LoopholeAction::Move, LoopholeAction::Create, LoopholeAction::Overwrite, LoopholeAction::Delete];

/// Named bug classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViolationCategory {
    SquattingFileApi,
    SafIntegrityLoophole(LoopholeAction),
    SafConfidentialityLoophole(LoopholeAction),
    SafRestrictionCreate,
    SafRestrictionOthers,
    AutoRenameInconsistency,
    MetaLeakShared,
    MetaLeakAppSpecific,
    ExifViolationAllFileAccess,
    ExifViolationSafPicker,
    ExifViolationOther,
    ExifFail,
    SharedStorageFail,
    MediaStoreVsFile,
    DownloadLeakAllFileAccess,
    MediaEditFileApi,
    MediaEditMediaStore,
}

impl ViolationCategory {
    /// Every category, in report order.
    pub fn all() -> Vec<ViolationCategory> {
        let mut out = vec![ViolationCategory::SquattingFileApi];
        out.extend(INTEGRITY_ACTIONS.iter().map(|a| ViolationCategory::SafIntegrityLoophole(*a)));
        out.push(ViolationCategory::SafIntegrityLoophole(LoopholeAction::Other));
        out.extend(CONFIDENTIALITY_ACTIONS.iter().map(|a| ViolationCategory::SafConfidentialityLoophole(*a)));
        out.extend([
            ViolationCategory::SafConfidentialityLoophole(LoopholeAction::Other),
            ViolationCategory::SafRestrictionCreate,
            ViolationCategory::SafRestrictionOthers,
            ViolationCategory::AutoRenameInconsistency,
            ViolationCategory::MetaLeakShared,
            ViolationCategory::MetaLeakAppSpecific,
            ViolationCategory::ExifViolationAllFileAccess,
            ViolationCategory::ExifViolationSafPicker,
            ViolationCategory::ExifViolationOther,
            ViolationCategory::ExifFail,
            ViolationCategory::SharedStorageFail,
            ViolationCategory::MediaStoreVsFile,
            ViolationCategory::DownloadLeakAllFileAccess,
            ViolationCategory::MediaEditFileApi,
            ViolationCategory::MediaEditMediaStore,
        ]);
        out
    }

    pub fn label(&self) -> String {
        match self {
            ViolationCategory::SquattingFileApi => "Squatting attack to File API".into(),
            ViolationCategory::SafIntegrityLoophole(a) => format!("SAF loophole violates Integrity ({})", a.name()),
            ViolationCategory::SafConfidentialityLoophole(a) => {
                format!("SAF loophole violates Confidentiality ({})", a.name())
            }
            ViolationCategory::SafRestrictionCreate => "SAF restriction (CREATE)".into(),
            ViolationCategory::SafRestrictionOthers => "SAF restriction (OTHERS)".into(),
            ViolationCategory::AutoRenameInconsistency => "Auto-rename inconsistency".into(),
            ViolationCategory::MetaLeakShared => "Meta leak on shared storage".into(),
            ViolationCategory::MetaLeakAppSpecific => "Meta leak on app-specific storage".into(),
            ViolationCategory::ExifViolationAllFileAccess => "Exif violation (all file access)".into(),
            ViolationCategory::ExifViolationSafPicker => "Exif violation (saf picker)".into(),
            ViolationCategory::ExifViolationOther => "Exif violation (other)".into(),
            ViolationCategory::ExifFail => "Exif fail".into(),
            ViolationCategory::SharedStorageFail => "Shared storage fail".into(),
            ViolationCategory::MediaStoreVsFile => "MediaStore vs File".into(),
            ViolationCategory::DownloadLeakAllFileAccess => "Download leak (all file access)".into(),
            ViolationCategory::MediaEditFileApi => "Media edit by FILE api (all file access)".into(),
            ViolationCategory::MediaEditMediaStore => "Media edit by MEDIA-STORE api (all file access)".into(),
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Outcome of a dependency case as recorded next to its dependent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrerequisiteRecord {
    pub score: f64,
    pub case: String,
    pub violated: bool,
}

/// What the decision tables look at.
pub struct Context<'a> {
    pub case: &'a str,
    pub parsed: PrintableCase,
    pub detail: &'a CaseDetail,
    pub prerequisites: &'a BTreeMap<String, PrerequisiteRecord>,
    /// Serialized detail, for substring probes.
    detail_text: String,
}

impl<'a> Context<'a> {
    pub fn new(
        case: &'a str,
        detail: &'a CaseDetail,
        prerequisites: &'a BTreeMap<String, PrerequisiteRecord>,
    ) -> Option<Self> {
        let parsed = PrintableCase::parse(case).ok()?;
        let detail_text = serde_json::to_string(detail).unwrap_or_default();
        Some(Context { case, parsed, detail, prerequisites, detail_text })
    }

    fn api(&self) -> &str {
        &self.parsed.api
    }

    fn action(&self) -> &str {
        &self.parsed.final_action
    }

    fn has_diff(&self, attr: &str) -> bool {
        self.detail.diff_elements.contains(attr)
    }

    fn diff_is(&self, attrs: &[&str]) -> bool {
        self.detail.diff_elements.len() == attrs.len() && attrs.iter().all(|a| self.has_diff(a))
    }

    fn manage_granted(&self) -> bool {
        self.detail.permission.get(AppPermission::ManageExternalStorage.qualified_name()).copied().unwrap_or(false)
    }

    fn availability_targets(&self) -> Option<(&str, &str)> {
        match &self.detail.evidence {
            Evidence::Availability { root_feedback, app_feedback } => Some((target(root_feedback), target(app_feedback))),
            _ => None,
        }
    }

    fn confidentiality_texts(&self) -> Option<(String, String)> {
        match &self.detail.evidence {
            Evidence::Confidentiality { result_on_exist_file, result_on_non_exist_file } => {
                Some((text(result_on_exist_file), text(result_on_non_exist_file)))
            }
            _ => None,
        }
    }

    /// Final actions of violated prerequisites, with their parsed identities.
    fn violated_prerequisites(&self) -> impl Iterator<Item = PrintableCase> + '_ {
        self.prerequisites.values().filter(|p| p.violated).filter_map(|p| PrintableCase::parse(&p.case).ok())
    }
}

fn target(fb: &Feedback) -> &str {
    fb.observation().target.as_deref().unwrap_or("")
}

fn text(fb: &Feedback) -> String {
    fb.to_value().to_string()
}

/// When a prerequisite already broke the file, its action is what really happened.
fn effective_action(current: &str, prerequisite_action: &str) -> String {
    match prerequisite_action {
        "DELETE" | "MOVE" | "RENAME" => prerequisite_action.to_string(),
        "CREATE" | "OVERWRITE" if !matches!(current, "MOVE" | "DELETE" | "RENAME") => prerequisite_action.to_string(),
        _ => current.to_string(),
    }
}

type Check = fn(&Context<'_>) -> Option<ViolationCategory>;

fn squatting(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let (root, _) = ctx.availability_targets()?;
    let squats = ctx.detail.payload.iter().any(|s| s.starts_with("CREATE") || s.starts_with("OVERWRITE"));
    (ctx.api() == "FILE" && !root.starts_with(APP_SPECIFIC_PREFIX) && squats)
        .then_some(ViolationCategory::SquattingFileApi)
}

fn media_store_vs_file(ctx: &Context<'_>) -> Option<ViolationCategory> {
    (ctx.case.contains("SETUP,File") && ctx.api().starts_with("MEDIA-STORE")).then_some(ViolationCategory::MediaStoreVsFile)
}

fn exif_fail(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let saf = ctx.case.contains("READ(SAF-PICKER")
        || (ctx.case.contains("MOVE(SAF-PICKER") && ctx.detail.diff_elements.len() == 2);
    (ctx.has_diff("media_location") && saf).then_some(ViolationCategory::ExifFail)
}

fn auto_rename(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let (root, app) = ctx.availability_targets()?;
    let re = AUTO_RENAME.as_ref()?;
    let suffix = |t: &str| t.rsplit(' ').next().unwrap_or("").to_string();
    let prefix = |t: &str| t.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default();
    let matched = ctx.parsed.setup_index().is_some()
        && ctx.diff_is(&["target"])
        && re.is_match(&format!("{}{}", root, app))
        && suffix(root) != suffix(app)
        && prefix(root) == prefix(app);
    matched.then_some(ViolationCategory::AutoRenameInconsistency)
}

fn saf_on_own_files(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let (root, _) = ctx.availability_targets()?;
    if !ctx.api().starts_with("SAF-PICKER") || !root.starts_with(APP_SPECIFIC_PREFIX) {
        return None;
    }
    if ctx.action() != "MOVE" {
        // Only integrity prerequisites can have edited the file beforehand.
        if let Some(pre) = ctx.violated_prerequisites().find(|p| p.rule_id.starts_with('T')) {
            let actual = effective_action(ctx.action(), &pre.final_action);
            return Some(ViolationCategory::SafIntegrityLoophole(LoopholeAction::parse(&actual, &INTEGRITY_ACTIONS)));
        }
    }
    if ctx.action() == "CREATE" {
        Some(ViolationCategory::SafRestrictionCreate)
    } else {
        Some(ViolationCategory::SafRestrictionOthers)
    }
}

fn shared_storage_fail(ctx: &Context<'_>) -> Option<ViolationCategory> {
    (ctx.parsed.rule_id == "A2").then_some(ViolationCategory::SharedStorageFail)
}

fn media_edit(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let after = match &ctx.detail.evidence {
        Evidence::Integrity { file_after_modify, .. } => text(file_after_modify),
        _ => return None,
    };
    if ctx.parsed.rule_id != "T1" || !after.contains(SHARED_DOWNLOAD_MARK) || !ctx.manage_granted() {
        return None;
    }
    if ctx.api() == "FILE" {
        Some(ViolationCategory::MediaEditFileApi)
    } else if ctx.api().contains("MEDIA-STORE") {
        Some(ViolationCategory::MediaEditMediaStore)
    } else {
        None
    }
}

fn saf_integrity(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let mut actual = ctx.action().to_string();
    if let Some(pre) = ctx
        .violated_prerequisites()
        .find(|p| p.rule_id == ctx.parsed.rule_id && p.api.contains("SAF-PICKER"))
    {
        actual = effective_action(&actual, &pre.final_action);
    }
    Some(ViolationCategory::SafIntegrityLoophole(LoopholeAction::parse(&actual, &INTEGRITY_ACTIONS)))
}

fn saf_confidentiality(ctx: &Context<'_>) -> Option<ViolationCategory> {
    if !ctx.api().starts_with("SAF-PICKER") {
        return None;
    }
    if ctx.parsed.rule_id == "C3" {
        return Some(ViolationCategory::ExifViolationSafPicker);
    }
    let (exists, _) = ctx.confidentiality_texts()?;
    exists.contains(APP_SPECIFIC_MARK).then(|| {
        ViolationCategory::SafConfidentialityLoophole(LoopholeAction::parse(ctx.action(), &CONFIDENTIALITY_ACTIONS))
    })
}

fn meta_leak(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let signal = ctx.detail_text.contains(PERMISSION_DENIED)
        || ctx.diff_is(&["edit_path"])
        || ctx.diff_is(&["edit_path", "success"]);
    if !signal || !(ctx.api().starts_with("FILE") || ctx.api().starts_with("MEDIA-STORE")) {
        return None;
    }
    let (exists, _) = ctx.confidentiality_texts()?;
    if exists.contains(SHARED_DOWNLOAD_MARK) {
        Some(ViolationCategory::MetaLeakShared)
    } else if exists.contains(APP_SPECIFIC_MARK) {
        Some(ViolationCategory::MetaLeakAppSpecific)
    } else {
        None
    }
}

fn exif_violation(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let (exists, non_exists) = ctx.confidentiality_texts()?;
    if ctx.parsed.rule_id != "C3" || !exists.contains("media_location") || non_exists.contains("media_location") {
        return None;
    }
    Some(if ctx.api().starts_with("SAF-PICKER") {
        ViolationCategory::ExifViolationSafPicker
    } else if ctx.manage_granted() {
        ViolationCategory::ExifViolationAllFileAccess
    } else {
        ViolationCategory::ExifViolationOther
    })
}

fn download_leak(ctx: &Context<'_>) -> Option<ViolationCategory> {
    let (exists, non_exists) = ctx.confidentiality_texts()?;
    let matched = ctx.parsed.rule_id == "C2"
        && exists.contains(SHARED_DOWNLOAD_MARK)
        && non_exists.contains(SHARED_DOWNLOAD_MARK)
        && ctx.api().starts_with("FILE")
        && ctx.manage_granted();
    matched.then_some(ViolationCategory::DownloadLeakAllFileAccess)
}

const AVAILABILITY_TABLE: &[(&str, Check)] = &[
    ("squatting", squatting),
    ("media-store-vs-file", media_store_vs_file),
    ("exif-fail", exif_fail),
    ("auto-rename", auto_rename),
    ("saf-own-files", saf_on_own_files),
    ("shared-storage", shared_storage_fail),
];

const INTEGRITY_TABLE: &[(&str, Check)] = &[("media-edit", media_edit), ("saf-integrity", saf_integrity)];

const CONFIDENTIALITY_TABLE: &[(&str, Check)] = &[
    ("saf-confidentiality", saf_confidentiality),
    ("meta-leak", meta_leak),
    ("exif-violation", exif_violation),
    ("download-leak", download_leak),
];

/// Classifies a violating case. `None` means unknown.
pub fn categorize(
    case: &str,
    detail: &CaseDetail,
    prerequisites: &BTreeMap<String, PrerequisiteRecord>,
) -> Option<ViolationCategory> {
    let Some(ctx) = Context::new(case, detail, prerequisites) else {
        tracing::warn!(case, "case text could not be parsed, leaving uncategorized");
        return None;
    };
    let table = match detail.rule_type {
        RuleType::Availability => AVAILABILITY_TABLE,
        RuleType::Integrity => INTEGRITY_TABLE,
        RuleType::Confidentiality => CONFIDENTIALITY_TABLE,
    };
    table.iter().find_map(|(name, check)| {
        let hit = check(&ctx);
        if let Some(category) = &hit {
            tracing::debug!(entry = *name, category = %category, "violation categorized");
        }
        hit
    })
}
