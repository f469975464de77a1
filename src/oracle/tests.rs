#![cfg(test)]

use crate::action::Action;
use crate::capability::Catalog;
use crate::case::{Payload, PayloadStep, TestCase};
use crate::error::HarnessError;
use crate::oracle::{DeviceError, Evidence, Oracle, RetryPolicy};
use crate::permissions::PermissionSetting;
use crate::sim::SimulatedDevice;
use crate::types::AppRole;

// --- Test Utilities ---

fn no_wait() -> RetryPolicy {
    RetryPolicy { max_attempts: 2, backoff_ms: 0 }
}

fn oracle() -> Oracle<SimulatedDevice> {
    let mut oracle = Oracle::new(SimulatedDevice::new(true), no_wait());
    oracle.install_apps().unwrap();
    oracle
}

fn case(
    catalog: &Catalog,
    rule_id: &str,
    template_hint: &str,
    final_action: Action,
    steps: Vec<PayloadStep>,
    permission: PermissionSetting,
) -> TestCase {
    let rule = catalog.rule(rule_id).unwrap();
    let template = rule.templates().into_iter().find(|t| t.template.contains(template_hint)).unwrap();
    let api = catalog.file_api().unwrap();
    TestCase::new(rule, final_action, api, Payload::new(steps), permission, template, ".txt", 10)
}

// --- Confidentiality ---

#[test]
fn confidentiality_detects_existence_leak_with_all_files_access() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(&catalog, "C2", "Download", Action::Read, vec![PayloadStep::setup(file)], PermissionSetting::ALL);

    let outcome = oracle().perform(&c).unwrap();
    assert!(!outcome.passed);
    assert!(outcome.detail.diff_elements.contains("success"));
    assert!(outcome.detail.diff_elements.contains("content"));
    assert!(matches!(outcome.detail.evidence, Evidence::Confidentiality { .. }));
    assert_eq!(outcome.detail.final_action, "READ_FILE");
    assert_eq!(outcome.detail.payload, vec!["SETUP,File".to_string()]);
}

#[test]
fn confidentiality_reports_errno_leak_on_app_specific_storage() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(&catalog, "C1", "Android/data", Action::Read, vec![PayloadStep::setup(file)], PermissionSetting::ALL);

    let outcome = oracle().perform(&c).unwrap();
    // Both reads fail, but EACCES versus ENOENT reveals that the file exists.
    assert!(!outcome.passed);
    assert_eq!(outcome.detail.diff_elements.iter().collect::<Vec<_>>(), vec!["content"]);
}

// --- Integrity ---

#[test]
fn integrity_holds_without_write_access() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let rule = catalog.rule("T1").unwrap();
    let perm = rule.permissions[0];
    let c = case(&catalog, "T1", "Download", Action::Overwrite, vec![PayloadStep::setup(file)], perm);

    let outcome = oracle().perform(&c).unwrap();
    assert!(outcome.passed);
    match &outcome.detail.evidence {
        Evidence::Integrity { file_before_modify, file_after_modify } => {
            assert!(file_before_modify.is_privileged());
            assert_eq!(file_before_modify, file_after_modify);
        }
        other => panic!("unexpected evidence {:?}", other),
    }
    assert!(outcome.detail.reproduce.iter().any(|l| l.contains("OVERWRITE_FILE")));
}

#[test]
fn integrity_without_setup_has_no_reference() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let rule = catalog.rule("T1").unwrap();
    let c = case(
        &catalog,
        "T1",
        "Download",
        Action::Delete,
        vec![PayloadStep::act(Action::Create, file)],
        rule.permissions[0],
    );
    assert!(matches!(oracle().perform(&c), Err(HarnessError::MissingReference(_))));
}

// --- Availability ---

#[test]
fn availability_detects_squatted_create() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(
        &catalog,
        "A2",
        "Download",
        Action::Create,
        vec![PayloadStep::act(Action::Create, file.clone()), PayloadStep::setup(file)],
        PermissionSetting::NONE,
    );

    let outcome = oracle().perform(&c).unwrap();
    assert!(!outcome.passed);
    assert_eq!(outcome.detail.diff_elements.iter().collect::<Vec<_>>(), vec!["content"]);
    match &outcome.detail.evidence {
        Evidence::Availability { root_feedback, app_feedback } => {
            assert!(root_feedback.is_privileged() && app_feedback.is_privileged());
        }
        other => panic!("unexpected evidence {:?}", other),
    }
}

#[test]
fn availability_of_own_file_holds() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(&catalog, "A1", "Android/data", Action::Delete, vec![PayloadStep::setup(file)], PermissionSetting::NONE);

    let outcome = oracle().perform(&c).unwrap();
    assert!(outcome.passed, "{:?}", outcome.detail);
    assert!(!outcome.detail.replacement.is_empty());
}

// --- Device failures ---

#[test]
fn timeouts_become_recorded_observations() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(&catalog, "C2", "Download", Action::Read, vec![PayloadStep::setup(file)], PermissionSetting::ALL);

    let mut oracle = oracle();
    // Both attempts of the reference read time out.
    oracle.device_mut().inject(DeviceError::Timeout("no logcat output".into()));
    oracle.device_mut().inject(DeviceError::Timeout("no logcat output".into()));
    let outcome = oracle.perform(&c).unwrap();
    match &outcome.detail.evidence {
        Evidence::Confidentiality { result_on_non_exist_file, .. } => {
            assert_eq!(result_on_non_exist_file.success(), Some("FAIL"));
            assert_eq!(result_on_non_exist_file.observation().get_str("content"), Some("false"));
        }
        other => panic!("unexpected evidence {:?}", other),
    }
}

#[test]
fn transport_failure_aborts() {
    let catalog = Catalog::standard().unwrap();
    let file = catalog.file_api().unwrap();
    let c = case(&catalog, "C2", "Download", Action::Read, vec![PayloadStep::setup(file)], PermissionSetting::ALL);

    let mut oracle = oracle();
    oracle.device_mut().inject(DeviceError::Transport("device offline".into()));
    assert!(matches!(oracle.perform(&c), Err(HarnessError::Device(DeviceError::Transport(_)))));
}

#[test]
fn install_covers_every_role() {
    let mut oracle = oracle();
    assert_eq!(oracle.device().installed().len(), AppRole::ALL.len());
    assert!(oracle.has_root());
}
