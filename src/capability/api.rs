//! Storage APIs the test apps can use to reach a file.

use std::collections::BTreeSet;
use std::fmt;

use regex::RegexSet;

use crate::action::Action;
use crate::capability::target::StorageTarget;
use crate::error::HarnessError;

/// Name prefix of picker-style APIs that need user interaction.
pub const SAF_PICKER: &str = "saf-picker";
/// The plain path-based API.
pub const FILE_API: &str = "file";

/// A storage API, either a single path API or a composed acquisition@management@access chain.
#[derive(Debug, Clone)]
pub struct StorageApi {
    name: String,
    invalid_actions: BTreeSet<Action>,
    invalid_target_patterns: BTreeSet<String>,
    matcher: RegexSet,
}

impl StorageApi {
    /// Builds an API that rejects the given actions and any target matching one of `invalid_targets`.
    pub fn new(
        name: &str,
        invalid_actions: &[Action],
        invalid_targets: &[StorageTarget],
    ) -> Result<Self, HarnessError> {
        let patterns: BTreeSet<String> = invalid_targets.iter().map(StorageTarget::pattern).collect();
        Self::from_parts(name.to_string(), invalid_actions.iter().copied().collect(), patterns)
    }

    fn from_parts(
        name: String,
        invalid_actions: BTreeSet<Action>,
        invalid_target_patterns: BTreeSet<String>,
    ) -> Result<Self, HarnessError> {
        let matcher = RegexSet::new(&invalid_target_patterns)
            .map_err(|e| HarnessError::InvariantViolation(format!("bad target pattern for {}: {}", name, e)))?;
        Ok(StorageApi { name, invalid_actions, invalid_target_patterns, matcher })
    }

    /// Composes `get@manage@access`; invalid sets are unions of the parts.
    pub fn combo(get: &StorageApi, manage: &StorageApi, access: &StorageApi) -> Result<Self, HarnessError> {
        let name = format!("{}@{}@{}", get.name, manage.name, access.name);
        let mut actions = get.invalid_actions.clone();
        let mut patterns = get.invalid_target_patterns.clone();
        for part in [manage, access] {
            actions.extend(part.invalid_actions.iter().copied());
            patterns.extend(part.invalid_target_patterns.iter().cloned());
        }
        Self::from_parts(name, actions, patterns)
    }

    /// Raw name, e.g. `media-store@content-resolver@io-stream`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-case name used in case identities, e.g. `MEDIA-STORE@CONTENT-RESOLVER@IO-STREAM`.
    pub fn upper_name(&self) -> String {
        self.name.to_ascii_uppercase()
    }

    /// Title-cased name with dashes removed, e.g. `MediaStore@ContentResolver@IoStream`.
    pub fn printable_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut prev_alpha = false;
        for ch in self.name.chars() {
            if ch.is_ascii_alphabetic() {
                if prev_alpha {
                    out.push(ch.to_ascii_lowercase());
                } else {
                    out.push(ch.to_ascii_uppercase());
                }
                prev_alpha = true;
            } else {
                if ch != '-' {
                    out.push(ch);
                }
                prev_alpha = false;
            }
        }
        out
    }

    /// Identifier comparison that ignores case and dashes, so raw, upper and printable
    /// names all resolve to the same API.
    pub fn matches_identifier(&self, ident: &str) -> bool {
        normalize_ident(&self.name) == normalize_ident(ident)
    }

    pub fn is_valid_action(&self, action: Action) -> bool {
        !self.invalid_actions.contains(&action)
    }

    pub fn is_valid_target(&self, target: &StorageTarget) -> bool {
        !self.matcher.is_match(&target.to_string())
    }

    pub fn is_saf_picker(&self) -> bool {
        self.name.starts_with(SAF_PICKER)
    }

    pub fn is_file_api(&self) -> bool {
        self.name == FILE_API
    }

    pub fn is_media_store(&self) -> bool {
        self.name.starts_with("media-store")
    }
}

fn normalize_ident(s: &str) -> String {
    s.chars().filter(|c| *c != '-').map(|c| c.to_ascii_uppercase()).collect()
}

impl PartialEq for StorageApi {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for StorageApi {}

impl std::hash::Hash for StorageApi {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for StorageApi {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageApi {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for StorageApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.upper_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Collection, Facet, Scope, StorageTier};

    fn media_store() -> StorageApi {
        StorageApi::new(
            "media-store",
            &[Action::Move],
            &[
                StorageTarget::new(StorageTier::Internal, Facet::all(), Facet::all()),
                StorageTarget::new(Facet::all(), Collection::AppFolder, Facet::all()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn printable_name_title_cases_segments() {
        let get = media_store();
        let manage = StorageApi::new("content-resolver", &[], &[]).unwrap();
        let access = StorageApi::new("io-stream", &[], &[]).unwrap();
        let combo = StorageApi::combo(&get, &manage, &access).unwrap();
        assert_eq!(combo.name(), "media-store@content-resolver@io-stream");
        assert_eq!(combo.printable_name(), "MediaStore@ContentResolver@IoStream");
        assert_eq!(combo.to_string(), "MEDIA-STORE@CONTENT-RESOLVER@IO-STREAM");
        assert!(combo.matches_identifier("MediaStore@ContentResolver@IoStream"));
        assert!(!combo.is_valid_action(Action::Move));
    }

    #[test]
    fn invalid_targets_match_open_facets() {
        let api = media_store();
        let internal = StorageTarget::new(StorageTier::Internal, Collection::AppFolder, Scope::MyApp);
        let app = StorageTarget::new(StorageTier::External, Collection::AppFolder, Scope::OtherApps);
        let shared = StorageTarget::new(StorageTier::External, Collection::SharedImage, Scope::OtherApps);
        let mixed = StorageTarget::new(
            StorageTier::External,
            Facet::any_of(&[Collection::SharedImage, Collection::SharedDownload]),
            Scope::MyApp,
        );
        assert!(!api.is_valid_target(&internal));
        assert!(!api.is_valid_target(&app));
        assert!(api.is_valid_target(&shared));
        assert!(api.is_valid_target(&mixed));
    }
}
