//! The immutable catalog of storage APIs and security rules.
//!
//! Built once at startup and passed by reference to the generator, sampler,
//! oracle and case parser.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::Action;
use crate::capability::api::{StorageApi, FILE_API};
use crate::capability::rule::SecurityRule;
use crate::capability::target::StorageTarget;
use crate::error::HarnessError;
use crate::permissions::PermissionSetting;
use crate::types::{Attribute, Collection, Facet, Scope, StorageTier};

/// All APIs and rules known to a run.
#[derive(Debug, Clone)]
pub struct Catalog {
    apis: Vec<Arc<StorageApi>>,
    rules: BTreeMap<String, Arc<SecurityRule>>,
}

impl Catalog {
    /// A catalog with the given APIs and no rules.
    pub fn new(apis: Vec<Arc<StorageApi>>) -> Self {
        Catalog { apis, rules: BTreeMap::new() }
    }

    /// The path API plus every allowed acquisition@management@access combination,
    /// in catalog order.
    pub fn standard_apis() -> Result<Vec<Arc<StorageApi>>, HarnessError> {
        let internal = StorageTarget::new(StorageTier::Internal, Facet::all(), Facet::all());
        let app_folder = StorageTarget::new(Facet::all(), Collection::AppFolder, Facet::all());

        let file = StorageApi::new(FILE_API, &[], &[])?;
        let get_uri = [
            StorageApi::new("media-store", &[Action::Move], &[internal.clone(), app_folder])?,
            StorageApi::new("saf-picker", &[], &[internal.clone()])?,
        ];
        let manage_uri = [
            StorageApi::new("content-resolver", &[], &[internal.clone()])?,
            StorageApi::new("document-file", &[], &[internal.clone()])?,
            StorageApi::new("documents-contract", &[], &[internal])?,
        ];
        let access_uri = [
            StorageApi::new("file-descriptor", &[], &[])?,
            StorageApi::new("io-stream", &[], &[])?,
        ];

        let mut apis = vec![Arc::new(file)];
        for get in &get_uri {
            for manage in &manage_uri {
                // Document APIs only accept picker URIs; the content resolver never does.
                let picker = get.is_saf_picker();
                let document_api = manage.name() != "content-resolver";
                if document_api != picker {
                    continue;
                }
                for access in &access_uri {
                    apis.push(Arc::new(StorageApi::combo(get, manage, access)?));
                }
            }
        }
        Ok(apis)
    }

    /// The standard APIs and the A1-A3, C1-C3, T1-T2 rule set.
    pub fn standard() -> Result<Self, HarnessError> {
        let apis = Self::standard_apis()?;
        let mut catalog = Catalog::new(apis);
        let all_apis = catalog.apis.clone();
        let non_saf: Vec<Arc<StorageApi>> =
            all_apis.iter().filter(|a| !a.is_saf_picker()).cloned().collect();
        let all_attributes = Attribute::ALL;
        let ext = StorageTier::External;

        catalog.add_rule(SecurityRule::new(
            "A1",
            Action::ALL,
            vec![StorageTarget::new(ext, Collection::AppFolder, Scope::MyApp)],
            all_attributes,
            all_apis.clone(),
            vec![PermissionSetting::NONE],
        )?);
        catalog.add_rule(SecurityRule::new(
            "A2",
            Action::ALL,
            vec![StorageTarget::new(
                ext,
                Facet::any_of(&[Collection::SharedImage, Collection::SharedDownload]),
                Scope::MyApp,
            )],
            all_attributes,
            all_apis.clone(),
            vec![PermissionSetting::NONE],
        )?);
        // Storage permission alone does not expose EXIF location.
        catalog.add_rule(SecurityRule::new(
            "A3",
            [Action::Read],
            vec![StorageTarget::new(
                ext,
                Facet::any_of(&[Collection::SharedImage, Collection::SharedVideo, Collection::SharedAudio]),
                Scope::OtherApps,
            )],
            all_attributes.into_iter().filter(|a| *a != Attribute::MediaLocation),
            all_apis.clone(),
            vec![PermissionSetting::from_array(&[0, 1, 0, 0, 0])?],
        )?);
        catalog.add_rule(SecurityRule::new(
            "C1",
            Action::ALL,
            vec![StorageTarget::new(ext, Collection::AppFolder, Scope::OtherApps)],
            all_attributes,
            all_apis.clone(),
            vec![PermissionSetting::ALL],
        )?);
        catalog.add_rule(SecurityRule::new(
            "C2",
            Action::ALL,
            vec![StorageTarget::new(ext, Collection::SharedDownload, Scope::OtherApps)],
            all_attributes,
            non_saf.clone(),
            vec![PermissionSetting::ALL],
        )?);
        catalog.add_rule(SecurityRule::new(
            "C3",
            Action::ALL,
            vec![StorageTarget::new(ext, Collection::SharedImage, Scope::OtherApps)],
            [Attribute::MediaLocation],
            all_apis.clone(),
            vec![
                PermissionSetting::from_array(&[0, 0, 0, 0, 0])?,
                PermissionSetting::from_array(&[0, 1, 0, 0, 0])?,
                PermissionSetting::from_array(&[0, 0, 1, 0, 0])?,
                PermissionSetting::from_array(&[0, 1, 1, 0, 0])?,
            ],
        )?);
        let modifying: Vec<Action> = Action::ALL.into_iter().filter(|a| *a != Action::Read).collect();
        catalog.add_rule(SecurityRule::new(
            "T1",
            modifying.clone(),
            vec![StorageTarget::new(ext, Collection::SharedDownload, Scope::OtherApps)],
            all_attributes,
            non_saf,
            vec![PermissionSetting::from_array(&[1, 1, 0, 1, 1])?],
        )?);
        catalog.add_rule(SecurityRule::new(
            "T2",
            modifying,
            vec![StorageTarget::new(ext, Collection::AppFolder, Scope::OtherApps)],
            all_attributes,
            all_apis,
            vec![PermissionSetting::ALL],
        )?);
        Ok(catalog)
    }

    /// Registers a rule, replacing any rule with the same id.
    pub fn add_rule(&mut self, rule: SecurityRule) {
        self.rules.insert(rule.id.clone(), Arc::new(rule));
    }

    pub fn apis(&self) -> &[Arc<StorageApi>] {
        &self.apis
    }

    /// Rules sorted by id.
    pub fn rules(&self) -> impl Iterator<Item = &Arc<SecurityRule>> {
        self.rules.values()
    }

    pub fn rule(&self, id: &str) -> Result<Arc<SecurityRule>, HarnessError> {
        self.rules.get(id).cloned().ok_or_else(|| HarnessError::UnknownRule(id.to_string()))
    }

    /// Resolves raw (`saf-picker@document-file@io-stream`), upper or printable
    /// (`SafPicker@DocumentFile@IoStream`) API names.
    pub fn api(&self, ident: &str) -> Result<Arc<StorageApi>, HarnessError> {
        self.apis
            .iter()
            .find(|a| a.matches_identifier(ident))
            .cloned()
            .ok_or_else(|| HarnessError::UnknownApi(ident.to_string()))
    }

    pub fn file_api(&self) -> Result<Arc<StorageApi>, HarnessError> {
        self.api(FILE_API)
    }
}
