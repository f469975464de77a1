//! Declarative security rules.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::capability::api::StorageApi;
use crate::capability::target::{PathTemplate, StorageTarget};
use crate::error::HarnessError;
use crate::permissions::PermissionSetting;
use crate::types::{Attribute, RuleType};

/// Why a (api, action, template) triple falls outside a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicable {
    Api,
    TargetForApi,
    TargetPath,
    Action,
}

impl fmt::Display for NotApplicable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NotApplicable::Api => "API not applicable",
            NotApplicable::TargetForApi => "Target not applicable to api",
            NotApplicable::TargetPath => "Target path not applicable",
            NotApplicable::Action => "Action not applicable",
        };
        f.write_str(msg)
    }
}

/// An access-control expectation: for these actions through these APIs against
/// these targets under these permission settings, the observed attributes must
/// satisfy the rule type's property.
#[derive(Debug, Clone)]
pub struct SecurityRule {
    pub id: String,
    pub rule_type: RuleType,
    pub actions: BTreeSet<Action>,
    pub targets: Vec<StorageTarget>,
    pub attributes: BTreeSet<Attribute>,
    /// Sorted by name.
    pub apis: Vec<Arc<StorageApi>>,
    pub permissions: Vec<PermissionSetting>,
    /// Explicit per-rule coverage floor used by sampling.
    pub minimum_case_required: Option<usize>,
}

impl SecurityRule {
    /// The rule type is derived from the id's first letter (`A`, `T`, `C`).
    pub fn new(
        id: &str,
        actions: impl IntoIterator<Item = Action>,
        targets: Vec<StorageTarget>,
        attributes: impl IntoIterator<Item = Attribute>,
        apis: impl IntoIterator<Item = Arc<StorageApi>>,
        permissions: Vec<PermissionSetting>,
    ) -> Result<Self, HarnessError> {
        let rule_type = RuleType::from_rule_id(id)?;
        let mut apis: Vec<Arc<StorageApi>> = apis.into_iter().collect();
        apis.sort();
        apis.dedup();
        let mut permissions = permissions;
        permissions.sort_by_key(|p| p.to_array());
        permissions.dedup();
        if permissions.is_empty() {
            return Err(HarnessError::Config(format!("rule {} has no permission settings", id)));
        }
        Ok(SecurityRule {
            id: id.to_string(),
            rule_type,
            actions: actions.into_iter().collect(),
            targets,
            attributes: attributes.into_iter().collect(),
            apis,
            permissions,
            minimum_case_required: None,
        })
    }

    pub fn with_minimum(mut self, minimum: usize) -> Self {
        self.minimum_case_required = Some(minimum);
        self
    }

    pub fn has_api(&self, api: &StorageApi) -> bool {
        self.apis.iter().any(|a| a.as_ref() == api)
    }

    /// Templates of every rule target.
    pub fn templates(&self) -> Vec<PathTemplate> {
        self.targets.iter().flat_map(StorageTarget::get_paths).collect()
    }

    /// Checks whether `api` performing `action` on `template` falls under this rule.
    pub fn check_applicable(
        &self,
        api: &StorageApi,
        action: Action,
        template: &PathTemplate,
    ) -> Result<(), NotApplicable> {
        if !self.has_api(api) {
            return Err(NotApplicable::Api);
        }
        if !self.targets.iter().any(|t| api.is_valid_target(t)) {
            return Err(NotApplicable::TargetForApi);
        }
        if !self.templates().iter().any(|p| p.template == template.template) {
            return Err(NotApplicable::TargetPath);
        }
        if !self.actions.contains(&action) {
            return Err(NotApplicable::Action);
        }
        Ok(())
    }

    pub fn is_applicable(&self, api: &StorageApi, action: Action, template: &PathTemplate) -> bool {
        self.check_applicable(api, action, template).is_ok()
    }

    /// Resolves a template string back to the rule target that produced it.
    pub fn find_template(&self, template: &str) -> Option<PathTemplate> {
        self.templates().into_iter().find(|p| p.template == template)
    }

    pub fn observes(&self, attribute: Attribute) -> bool {
        self.attributes.contains(&attribute)
    }
}

impl PartialEq for SecurityRule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SecurityRule {}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.rule_type.label(), self.id)
    }
}
