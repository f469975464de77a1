//! Storage targets and the path templates they expand to.

use std::fmt;

use crate::types::{Collection, Facet, Scope, StorageTier};

/// Placeholder substituted with the acting app's package name.
pub const PACKAGE_PLACEHOLDER: &str = "${p}";

/// A (storage tier, collection, scope) triple. Each facet may be `ALL` or a subset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageTarget {
    pub storage: Facet<StorageTier>,
    pub collection: Facet<Collection>,
    pub scope: Facet<Scope>,
}

impl StorageTarget {
    pub fn new(
        storage: impl Into<Facet<StorageTier>>,
        collection: impl Into<Facet<Collection>>,
        scope: impl Into<Facet<Scope>>,
    ) -> Self {
        StorageTarget { storage: storage.into(), collection: collection.into(), scope: scope.into() }
    }

    /// Every storage tier, `collection` and `scope` left open.
    pub fn any() -> Self {
        StorageTarget { storage: Facet::all(), collection: Facet::all(), scope: Facet::all() }
    }

    /// Pattern used by storage APIs to reject targets; `ALL` facets match anything.
    pub fn pattern(&self) -> String {
        format!("^{}-{}-{}$", self.storage.pattern(), self.collection.pattern(), self.scope.pattern())
    }

    pub fn is_external(&self) -> bool {
        self.storage == Facet::One(StorageTier::External)
    }

    pub fn is_internal(&self) -> bool {
        self.storage == Facet::One(StorageTier::Internal)
    }

    /// True for external shared collections, where picker-style APIs are assumed
    /// to hand the attacker whatever the user clicks.
    pub fn is_external_shared(&self) -> bool {
        self.is_external() && self.collection != Facet::One(Collection::AppFolder)
    }

    pub fn is_my_app(&self) -> bool {
        self.scope == Facet::One(Scope::MyApp)
    }

    /// Expands to the sorted, deduplicated list of path templates for this target.
    ///
    /// Internal storage ignores the collection directory. Shared-only collections
    /// get a `${p}_` file-name prefix, everything else a `${p}/` directory.
    pub fn get_paths(&self) -> Vec<PathTemplate> {
        let collections = self.collection.values();
        let shared_only = collections.iter().all(|c| c.is_shared());
        let mut templates: Vec<String> = Vec::new();
        for storage in self.storage.values() {
            for root in storage.roots() {
                for collection in &collections {
                    for dir in collection.dirs() {
                        let mut path = root.to_string();
                        if !self.is_internal() {
                            path.push_str(dir);
                        }
                        if shared_only {
                            path.push_str("/${p}_");
                        } else {
                            path.push_str("/${p}/");
                        }
                        templates.push(path);
                    }
                }
            }
        }
        templates.sort();
        templates.dedup();
        templates
            .into_iter()
            .map(|template| PathTemplate { template, target: self.clone() })
            .collect()
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.storage.name(), self.collection.name(), self.scope.name())
    }
}

/// A path template together with the target it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathTemplate {
    pub template: String,
    pub target: StorageTarget,
}

impl PathTemplate {
    /// Substitutes the package. Prefix-form templates (`${p}_`) only take the last
    /// dot-separated segment of the package name.
    pub fn render(&self, package: &str) -> String {
        let name = if self.template.contains("${p}_") {
            package.rsplit('.').next().unwrap_or(package)
        } else {
            package
        };
        self.template.replace(PACKAGE_PLACEHOLDER, name)
    }
}

/// File extensions worth probing under a template.
pub fn extensions_for(template: &str) -> Vec<&'static str> {
    let mut exts = Vec::new();
    let has = |c: Collection| c.dirs().iter().any(|d| template.contains(d));
    if has(Collection::SharedDownload) || has(Collection::AppFolder) {
        exts.extend([".pdf", ".txt"]);
    }
    if has(Collection::SharedImage) {
        exts.push(".jpg");
    }
    if has(Collection::SharedAudio) {
        exts.push(".mp3");
    }
    if has(Collection::SharedVideo) {
        exts.push(".mp4");
    }
    if exts.is_empty() {
        exts.push(".txt");
    }
    exts.sort_unstable();
    exts.dedup();
    exts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_collections_use_prefix_template() {
        let t = StorageTarget::new(
            StorageTier::External,
            Facet::any_of(&[Collection::SharedImage, Collection::SharedDownload]),
            Scope::MyApp,
        );
        let paths: Vec<String> = t.get_paths().into_iter().map(|p| p.template).collect();
        assert_eq!(paths, vec!["/sdcard/Download/${p}_", "/sdcard/Pictures/${p}_"]);
    }

    #[test]
    fn app_folder_uses_directory_template() {
        let t = StorageTarget::new(StorageTier::External, Collection::AppFolder, Scope::OtherApps);
        let paths = t.get_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].template, "/sdcard/Android/data/${p}/");
        assert_eq!(
            paths[0].render("com.abc.storage_verifier_alpha"),
            "/sdcard/Android/data/com.abc.storage_verifier_alpha/"
        );
    }

    #[test]
    fn internal_storage_ignores_collection() {
        let t = StorageTarget::new(StorageTier::Internal, Facet::all(), Scope::MyApp);
        let paths: Vec<String> = t.get_paths().into_iter().map(|p| p.template).collect();
        assert_eq!(paths, vec!["/data/data/${p}/"]);
    }

    #[test]
    fn prefix_template_renders_last_package_segment() {
        let t = StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps);
        let p = &t.get_paths()[0];
        assert_eq!(p.render("com.abc.storage_verifier_gamma"), "/sdcard/Download/storage_verifier_gamma_");
    }

    #[test]
    fn extensions_follow_collection() {
        assert_eq!(extensions_for("/sdcard/Download/${p}_"), vec![".pdf", ".txt"]);
        assert_eq!(extensions_for("/sdcard/Pictures/${p}_"), vec![".jpg"]);
        assert_eq!(extensions_for("/sdcard/Movies/${p}_"), vec![".mp4"]);
        assert_eq!(extensions_for("/data/data/${p}/"), vec![".txt"]);
    }

    #[test]
    fn display_prints_all_for_open_facets() {
        let t = StorageTarget::new(StorageTier::External, Facet::any_of(&[Collection::SharedImage]), Scope::MyApp);
        assert_eq!(t.to_string(), "EXTERNAL_STORAGE-ALL-MY_APP");
    }
}
