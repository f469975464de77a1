//!
//! The differential oracle.
//!
//! Each rule type runs a fixed protocol between three app roles: alpha (victim),
//! beta (resource owner) and gamma (attacker). A case passes when the two
//! observations the protocol collects are equivalent after normalization:
//!
//! * Confidentiality: the attacker's view of a path before and after the victim's file exists.
//! * Integrity: privileged views of the victim's file before and after the attacker acts.
//! * Availability: the victim's final action on one file versus the same action
//!   performed with privileges on a sibling file, after the attacker touched both.

pub mod device;
pub mod normalize;
pub mod observation;
pub mod operator;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::action::Action;
use crate::capability::StorageApi;
use crate::case::{StepKind, TestCase};
use crate::error::HarnessError;
use crate::permissions::PermissionSetting;
use crate::types::{AppRole, Attribute, RuleType};

pub use device::{Device, DeviceError, RetryPolicy};
pub use normalize::{count_diff, diff, extract_rand_from_path, same_feedback, DiffResult, Replacements};
pub use observation::{Feedback, Observation};
pub use operator::{ActionParams, Operator};

use observation::usable_path;

/// The pair of observations a protocol compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Evidence {
    Integrity { file_before_modify: Feedback, file_after_modify: Feedback },
    Confidentiality { result_on_exist_file: Feedback, result_on_non_exist_file: Feedback },
    Availability { root_feedback: Feedback, app_feedback: Feedback },
}

impl Evidence {
    pub fn pair(&self) -> (&Feedback, &Feedback) {
        match self {
            Evidence::Integrity { file_before_modify, file_after_modify } => (file_before_modify, file_after_modify),
            Evidence::Confidentiality { result_on_exist_file, result_on_non_exist_file } => {
                (result_on_exist_file, result_on_non_exist_file)
            }
            Evidence::Availability { root_feedback, app_feedback } => (root_feedback, app_feedback),
        }
    }
}

/// Everything recorded about one executed case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDetail {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub rule_id: String,
    /// `<ACTION>_<API>`, e.g. `OVERWRITE_FILE`.
    pub final_action: String,
    pub permission: BTreeMap<String, bool>,
    pub payload: Vec<String>,
    /// Every probe issued, in order.
    pub reproduce: Vec<String>,
    pub replacement: Replacements,
    #[serde(flatten)]
    pub evidence: Evidence,
    pub diff_attr_count: usize,
    pub diff_elements: BTreeSet<String>,
}

impl CaseDetail {
    pub fn diff(&self) -> DiffResult {
        DiffResult { count: self.diff_attr_count, elements: self.diff_elements.clone() }
    }
}

/// Verdict and detail of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub passed: bool,
    pub detail: CaseDetail,
}

/// Result of one probe.
struct Probed {
    observation: Observation,
    /// Where the device says the file ended up, before attribute filtering.
    edit_path: Option<String>,
    succeeded: bool,
}

/// Issues probes for one case and records the reproduce trail.
struct Probe<'a, D: Device> {
    device: &'a mut D,
    retry: RetryPolicy,
    observed: &'a BTreeSet<Attribute>,
    reproduce: Vec<String>,
}

impl<'a, D: Device> Probe<'a, D> {
    fn finish(&self, action: Action, params: &ActionParams, raw: Option<Observation>) -> Probed {
        match raw {
            Some(raw) => {
                let edit_path = normalize::raw_edit_path(&raw);
                let succeeded = raw.succeeded();
                Probed { observation: normalize::normalize(raw, self.observed), edit_path, succeeded }
            }
            None => Probed {
                observation: normalize::normalize(Observation::unanswered(action, &params.path), self.observed),
                edit_path: None,
                succeeded: false,
            },
        }
    }

    fn run(&mut self, package: &str, action: Action, api: &StorageApi, params: &ActionParams) -> Result<Probed, HarnessError> {
        self.reproduce.push(format!(
            "{} {} api={} {}",
            package,
            action.flag(),
            api.name(),
            serde_json::to_string(params)?
        ));
        let device = &mut *self.device;
        let raw = self.retry.run(|| device.execute(package, action, api, params))?;
        if raw.is_none() {
            info!(package, action = %action, "no result after retries, recording definitive failure");
        }
        Ok(self.finish(action, params, raw))
    }

    fn create(&mut self, package: &str, path: &str, data: &str, api: &StorageApi, rename: bool) -> Result<Probed, HarnessError> {
        let path = if rename { self.device.available_name(path)? } else { path.to_string() };
        self.run(package, Action::Create, api, &ActionParams::create(&path, data))
    }

    fn read(&mut self, package: &str, path: &str, api: &StorageApi) -> Result<Probed, HarnessError> {
        self.run(package, Action::Read, api, &ActionParams::read(path))
    }

    fn root_run(&mut self, action: Action, params: &ActionParams, rename: bool, log: bool) -> Result<Probed, HarnessError> {
        if log {
            self.reproduce.push(format!(
                "ROOT-SHELL {} {} (rename={})",
                action.flag(),
                serde_json::to_string(params)?,
                rename
            ));
        }
        let device = &mut *self.device;
        let raw = self.retry.run(|| device.execute_privileged(action, params, rename))?;
        Ok(self.finish(action, params, raw))
    }

    fn root_read(&mut self, path: &str, log: bool) -> Result<Probed, HarnessError> {
        self.root_run(Action::Read, &ActionParams::read(path), false, log)
    }

    /// The feedback a case is judged on.
    ///
    /// READ cases use the app's own report. Anything else is judged by a privileged
    /// read of `path`, or of the reported destination when the action relocated the file.
    fn root_observation(&mut self, case: &TestCase, probed: Probed, path: &str) -> Result<Feedback, HarnessError> {
        if case.final_action() == Action::Read {
            return Ok(Feedback::Direct(probed.observation));
        }
        let mut path = path.to_string();
        if probed.succeeded && case.final_action().relocates() {
            if let Some(dest) = usable_path(probed.edit_path.as_deref()) {
                path = dest.to_string();
            }
        }
        let observed = self.root_read(&path, false)?;
        Ok(Feedback::Privileged { observation: observed.observation })
    }
}

fn is_blank(fb: &Feedback) -> bool {
    let o = fb.observation();
    o.action.is_none() && o.success.is_none() && o.target.is_none() && o.result.is_empty()
}

/// Runs cases against a device.
pub struct Oracle<D: Device> {
    device: D,
    retry: RetryPolicy,
}

impl<D: Device> Oracle<D> {
    pub fn new(device: D, retry: RetryPolicy) -> Self {
        Oracle { device, retry }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn has_root(&mut self) -> bool {
        self.device.has_root()
    }

    /// Reinstalls every role's test app.
    pub fn install_apps(&mut self) -> Result<(), HarnessError> {
        for role in AppRole::ALL {
            self.device.remove_app(role.package())?;
            self.device.install_app(role.package())?;
        }
        info!("test apps installed");
        Ok(())
    }

    /// Wipes storage, then grants the case's permissions to `subject` and nothing to the others.
    fn prepare(&mut self, case: &TestCase, subject: AppRole) -> Result<(), HarnessError> {
        self.device.reset_shared_storage()?;
        for role in AppRole::ALL {
            self.device.reset_app_storage(role.package())?;
        }
        info!(permission = ?case.permission().to_printable(), "setting permissions");
        for role in AppRole::ALL {
            let setting = if role == subject { case.permission() } else { PermissionSetting::NONE };
            self.device.set_permissions(role.package(), setting, case.ext())?;
        }
        Ok(())
    }

    /// Executes `case` with the protocol of its rule type.
    ///
    /// # Errors
    /// Transport failures and a missing baseline observation are fatal.
    pub fn perform(&mut self, case: &TestCase) -> Result<CaseOutcome, HarnessError> {
        let rule_type = case.rule().rule_type;
        let my_app = case.template().target.is_my_app();
        let role = |r: AppRole| Operator::new(r, case.template(), case.ext(), case.seed(), case.printable());

        let subject = match rule_type {
            RuleType::Availability => AppRole::Alpha,
            RuleType::Integrity | RuleType::Confidentiality => AppRole::Gamma,
        };
        self.prepare(case, subject)?;

        let observed = case.rule().attributes.clone();
        let mut probe = Probe { device: &mut self.device, retry: self.retry, observed: &observed, reproduce: Vec::new() };

        let (evidence, replacement) = match rule_type {
            RuleType::Confidentiality => {
                let attacker = role(AppRole::Gamma);
                let victim = if my_app { attacker.clone() } else { role(AppRole::Alpha) };
                confidentiality(&mut probe, case, &attacker, &victim)?
            }
            RuleType::Integrity => {
                let attacker = role(AppRole::Gamma);
                let mut victim = if my_app { attacker.clone() } else { role(AppRole::Alpha) };
                integrity(&mut probe, case, &attacker, &mut victim)?
            }
            RuleType::Availability => {
                let attacker = role(AppRole::Gamma);
                let victim = role(AppRole::Alpha);
                let mut resource = if my_app { victim.clone() } else { role(AppRole::Beta) };
                availability(&mut probe, case, &attacker, &victim, &mut resource)?
            }
        };

        let trivially_passing = matches!(
            &evidence,
            Evidence::Availability { root_feedback, .. }
                if case.final_action() == Action::Read && root_feedback.success() == Some(observation::FAIL)
        );
        let (a, b) = evidence.pair();
        let result = if trivially_passing {
            DiffResult::default()
        } else {
            diff(&a.to_value(), &b.to_value(), &replacement)
        };
        debug!(case = %case.hash(), diff = result.count, "observations compared");

        let detail = CaseDetail {
            rule_type,
            rule_id: case.rule().id.clone(),
            final_action: format!("{}_{}", case.final_action().name(), case.api().upper_name()),
            permission: case.permission().to_printable(),
            payload: case.payload().printable(),
            reproduce: probe.reproduce,
            replacement,
            evidence,
            diff_attr_count: result.count,
            diff_elements: result.elements,
        };
        Ok(CaseOutcome { passed: detail.diff_attr_count == 0, detail })
    }
}

fn confidentiality<D: Device>(
    probe: &mut Probe<'_, D>,
    case: &TestCase,
    attacker: &Operator,
    victim: &Operator,
) -> Result<(Evidence, Replacements), HarnessError> {
    let mut replacement = Replacements::new();
    replacement.insert(attacker.package.as_str(), victim.package.as_str());

    let params = ActionParams::for_action(case.final_action(), victim, attacker);
    let reference = Feedback::Direct(probe.run(&attacker.package, case.final_action(), case.api(), &params)?.observation);
    if is_blank(&reference) {
        return Err(HarnessError::MissingReference(case.hash().to_string()));
    }

    for step in case.payload().steps() {
        match step.kind {
            StepKind::Setup => {
                probe.create(&victim.package, &victim.path, &victim.data, &step.api, true)?;
            }
            StepKind::Act(action) => {
                let p = ActionParams::for_action(action, victim, attacker);
                probe.run(&attacker.package, action, &step.api, &p)?;
            }
        }
    }

    let exists = Feedback::Direct(probe.run(&attacker.package, case.final_action(), case.api(), &params)?.observation);
    Ok((Evidence::Confidentiality { result_on_exist_file: exists, result_on_non_exist_file: reference }, replacement))
}

fn integrity<D: Device>(
    probe: &mut Probe<'_, D>,
    case: &TestCase,
    attacker: &Operator,
    victim: &mut Operator,
) -> Result<(Evidence, Replacements), HarnessError> {
    let mut replacement = Replacements::new();
    let mut before: Option<Feedback> = None;

    for step in case.payload().steps() {
        match step.kind {
            StepKind::Setup => {
                let created = probe.create(&victim.package, &victim.path, &victim.data, &step.api, true)?;
                if let Some(edit) = usable_path(created.edit_path.as_deref()) {
                    replacement.insert(victim.path.as_str(), edit);
                    victim.path = edit.to_string();
                }
                let read = probe.read(&victim.package, &victim.path, case.api())?;
                let path = victim.path.clone();
                before = Some(probe.root_observation(case, read, &path)?);
            }
            StepKind::Act(action) => {
                let p = ActionParams::for_action(action, victim, attacker);
                debug!(action = %action, params = ?p, "attacker step");
                probe.run(&attacker.package, action, &step.api, &p)?;
            }
        }
    }

    let params = ActionParams::for_action(case.final_action(), victim, attacker);
    probe.run(&attacker.package, case.final_action(), case.api(), &params)?;

    let before = before
        .filter(|fb| !is_blank(fb))
        .ok_or_else(|| HarnessError::MissingReference(case.hash().to_string()))?;
    let read = probe.read(&victim.package, &victim.path, case.api())?;
    let path = victim.path.clone();
    let after = probe.root_observation(case, read, &path)?;
    Ok((Evidence::Integrity { file_before_modify: before, file_after_modify: after }, replacement))
}

fn availability<D: Device>(
    probe: &mut Probe<'_, D>,
    case: &TestCase,
    attacker: &Operator,
    victim: &Operator,
    resource: &mut Operator,
) -> Result<(Evidence, Replacements), HarnessError> {
    let mut replacement = Replacements::new();
    replacement.insert_tokens(&resource.path, &resource.path3);
    replacement.insert_tokens(&resource.path2, &resource.path4);
    replacement.insert_tokens(&resource.path5, &resource.path6);
    // The longer directory must be rewritten before its prefix.
    replacement.insert(attacker.dirpath2.as_str(), attacker.dirpath.as_str());
    replacement.insert(victim.dirpath2.as_str(), victim.dirpath.as_str());

    let final_action = case.final_action();
    for step in case.payload().steps() {
        match step.kind {
            StepKind::Setup => {
                if final_action == Action::Create {
                    continue;
                }
                let first = probe.create(&resource.package, &resource.path, &resource.data, &step.api, true)?;
                let second = probe.create(&resource.package, &resource.path3, &resource.data, &step.api, true)?;
                if let Some(p) = usable_path(first.edit_path.as_deref()) {
                    resource.path = p.to_string();
                }
                if let Some(p) = usable_path(second.edit_path.as_deref()) {
                    resource.path3 = p.to_string();
                }
                replacement.insert_tokens(&resource.path, &resource.path3);
            }
            StepKind::Act(action) => {
                let base = ActionParams::for_action(action, resource, attacker);
                let (p1, p2) = match action {
                    Action::Move => (
                        base.clone().at(&resource.path).with_move_to(&attacker.dirpath),
                        base.at(&resource.path3).with_move_to(&attacker.dirpath2),
                    ),
                    Action::Rename => (
                        base.clone().at(&resource.path).with_move_to(&resource.path5),
                        base.at(&resource.path3).with_move_to(&resource.path6),
                    ),
                    _ => (
                        base.clone().at(&resource.path).with_data(&attacker.data).with_move_to(&resource.path2),
                        base.at(&resource.path3).with_data(&attacker.data).with_move_to(&resource.path4),
                    ),
                };
                probe.run(&attacker.package, action, &step.api, &p1)?;
                probe.run(&attacker.package, action, &step.api, &p2)?;
            }
        }
    }

    let rename = !case.api().is_file_api();
    let (app, root) = if final_action == Action::Create {
        let app = probe.create(&victim.package, &resource.path, &resource.data, case.api(), false)?;
        let root = probe.root_run(Action::Create, &ActionParams::create(&resource.path3, &resource.data), rename, true)?;
        if let Some(p) = usable_path(app.edit_path.as_deref()) {
            resource.path = p.to_string();
        }
        if let Some(p) = usable_path(root.edit_path.as_deref()) {
            resource.path3 = p.to_string();
        }
        replacement.insert_tokens(&resource.path, &resource.path3);
        (app, root)
    } else {
        let base = ActionParams::for_action(final_action, resource, victim);
        let (root_params, app_params) = if final_action == Action::Move {
            (
                base.clone().at(&resource.path3).with_move_to(&victim.dirpath2),
                base.at(&resource.path).with_move_to(&victim.dirpath2),
            )
        } else {
            (
                base.clone().at(&resource.path3).with_move_to(&resource.path4),
                base.at(&resource.path).with_move_to(&resource.path2),
            )
        };
        let app = probe.run(&victim.package, final_action, case.api(), &app_params)?;
        let root = probe.root_run(final_action, &root_params, rename, true)?;
        (app, root)
    };

    let app_path = resource.path.clone();
    let root_path = resource.path3.clone();
    let app_feedback = probe.root_observation(case, app, &app_path)?;
    let root_feedback = probe.root_observation(case, root, &root_path)?;
    if is_blank(&root_feedback) {
        return Err(HarnessError::MissingReference(case.hash().to_string()));
    }

    // Privileged and app writes land at different instants.
    let mtime = |fb: &Feedback| fb.observation().get_str("modified_time").map(str::to_string);
    if let (Some(t1), Some(t2)) = (mtime(&root_feedback), mtime(&app_feedback)) {
        if !t1.is_empty() && !t2.is_empty() && t1.bytes().all(|b| b.is_ascii_digit()) && t2.bytes().all(|b| b.is_ascii_digit()) {
            replacement.insert(t1, t2);
        }
    }
    info!(root = ?root_feedback.success(), app = ?app_feedback.success(), "availability feedback collected");
    Ok((Evidence::Availability { root_feedback, app_feedback }, replacement))
}

mod tests;
