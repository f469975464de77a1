//!
//! Shared enumerations describing where a probe lands (storage tier, collection, scope),
//! what a rule guards (rule type, attributes) and who plays which part in a protocol.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Storage tier a target lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageTier {
    /// App-private internal storage, only reachable with privileged access.
    #[serde(rename = "INTERNAL_STORAGE")]
    Internal,
    /// Emulated external storage (`/sdcard`).
    #[serde(rename = "EXTERNAL_STORAGE")]
    External,
}

impl StorageTier {
    pub const ALL: [StorageTier; 2] = [StorageTier::Internal, StorageTier::External];

    pub fn name(self) -> &'static str {
        match self {
            StorageTier::Internal => "INTERNAL_STORAGE",
            StorageTier::External => "EXTERNAL_STORAGE",
        }
    }

    /// Filesystem roots of this tier.
    pub fn roots(self) -> &'static [&'static str] {
        match self {
            StorageTier::Internal => &["/data/data"],
            StorageTier::External => &["/sdcard"],
        }
    }
}

/// Collection (directory family) inside a storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "SHARED_DOWNLOAD")]
    SharedDownload,
    #[serde(rename = "SHARED_IMAGE")]
    SharedImage,
    #[serde(rename = "SHARED_VIDEO")]
    SharedVideo,
    #[serde(rename = "SHARED_AUDIO")]
    SharedAudio,
    /// App-specific directory under `Android/data`.
    #[serde(rename = "APP_FOLDER")]
    AppFolder,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::SharedDownload,
        Collection::SharedImage,
        Collection::SharedVideo,
        Collection::SharedAudio,
        Collection::AppFolder,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::SharedDownload => "SHARED_DOWNLOAD",
            Collection::SharedImage => "SHARED_IMAGE",
            Collection::SharedVideo => "SHARED_VIDEO",
            Collection::SharedAudio => "SHARED_AUDIO",
            Collection::AppFolder => "APP_FOLDER",
        }
    }

    pub fn dirs(self) -> &'static [&'static str] {
        match self {
            Collection::SharedDownload => &["/Download"],
            Collection::SharedImage => &["/Pictures"],
            Collection::SharedVideo => &["/Movies"],
            Collection::SharedAudio => &["/Music"],
            Collection::AppFolder => &["/Android/data"],
        }
    }

    /// Shared collections are visible to every app through the media store.
    pub fn is_shared(self) -> bool {
        !matches!(self, Collection::AppFolder)
    }
}

/// Whose files a rule talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "MY_APP")]
    MyApp,
    #[serde(rename = "OTHER_APPS")]
    OtherApps,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::MyApp, Scope::OtherApps];

    pub fn name(self) -> &'static str {
        match self {
            Scope::MyApp => "MY_APP",
            Scope::OtherApps => "OTHER_APPS",
        }
    }
}

/// Names the three enums above share, used when building target patterns.
pub trait FacetValue: Copy + Ord + fmt::Debug + 'static {
    fn facet_name(self) -> &'static str;
    fn universe() -> &'static [Self];
}

impl FacetValue for StorageTier {
    fn facet_name(self) -> &'static str {
        self.name()
    }
    fn universe() -> &'static [Self] {
        &StorageTier::ALL
    }
}

impl FacetValue for Collection {
    fn facet_name(self) -> &'static str {
        self.name()
    }
    fn universe() -> &'static [Self] {
        &Collection::ALL
    }
}

impl FacetValue for Scope {
    fn facet_name(self) -> &'static str {
        self.name()
    }
    fn universe() -> &'static [Self] {
        &Scope::ALL
    }
}

/// One facet of a storage target: a single value or a set of values printed as `ALL`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Facet<T: FacetValue> {
    One(T),
    Any(Vec<T>),
}

impl<T: FacetValue> Facet<T> {
    /// Every value of the facet's universe.
    pub fn all() -> Self {
        Facet::Any(T::universe().to_vec())
    }

    pub fn any_of(values: &[T]) -> Self {
        let mut values = values.to_vec();
        values.sort();
        values.dedup();
        Facet::Any(values)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Facet::One(v) => v.facet_name(),
            Facet::Any(_) => "ALL",
        }
    }

    pub fn values(&self) -> Vec<T> {
        match self {
            Facet::One(v) => vec![*v],
            Facet::Any(vs) => vs.clone(),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Facet::Any(_))
    }

    /// Regex fragment matching this facet's printed name, where `Any` matches every value.
    pub fn pattern(&self) -> String {
        match self {
            Facet::One(v) => v.facet_name().to_string(),
            Facet::Any(_) => {
                let mut names: Vec<&str> = T::universe().iter().map(|v| v.facet_name()).collect();
                names.push("ALL");
                format!("({})", names.join("|"))
            }
        }
    }
}

impl<T: FacetValue> From<T> for Facet<T> {
    fn from(value: T) -> Self {
        Facet::One(value)
    }
}

/// The security property a rule asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleType {
    /// The owner can always operate on its own files.
    Availability,
    /// Files cannot be altered by unauthorized apps.
    Integrity,
    /// Other apps cannot learn anything about a file.
    Confidentiality,
}

impl RuleType {
    /// Printed form used in case details (`INTEGRITY`, ...).
    pub fn label(self) -> &'static str {
        match self {
            RuleType::Availability => "AVAILABILITY",
            RuleType::Integrity => "INTEGRITY",
            RuleType::Confidentiality => "CONFIDENTIALITY",
        }
    }

    /// Rule ids carry the type as their first letter.
    pub fn from_rule_id(id: &str) -> Result<Self, HarnessError> {
        match id.chars().next() {
            Some('A') => Ok(RuleType::Availability),
            Some('T') => Ok(RuleType::Integrity),
            Some('C') => Ok(RuleType::Confidentiality),
            _ => Err(HarnessError::UnknownRule(id.to_string())),
        }
    }
}

/// Observable file attribute a rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    EditPath,
    Content,
    Size,
    ModifiedTime,
    MediaLocation,
    Target,
    Success,
    Exception,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::EditPath,
        Attribute::Content,
        Attribute::Size,
        Attribute::ModifiedTime,
        Attribute::MediaLocation,
        Attribute::Target,
        Attribute::Success,
        Attribute::Exception,
    ];

    /// Key of the attribute inside an observation's result map.
    pub fn key(self) -> &'static str {
        match self {
            Attribute::EditPath => "edit_path",
            Attribute::Content => "content",
            Attribute::Size => "size",
            Attribute::ModifiedTime => "modified_time",
            Attribute::MediaLocation => "media_location",
            Attribute::Target => "target",
            Attribute::Success => "success",
            Attribute::Exception => "exception",
        }
    }
}

impl FromStr for Attribute {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .iter()
            .copied()
            .find(|a| a.key() == s)
            .ok_or_else(|| HarnessError::Config(format!("unknown attribute: {}", s)))
    }
}

/// Test apps installed on the device, one per protocol role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AppRole {
    /// Victim.
    Alpha,
    /// Resource owner / other app.
    Beta,
    /// Attacker.
    Gamma,
}

impl AppRole {
    pub const ALL: [AppRole; 3] = [AppRole::Alpha, AppRole::Beta, AppRole::Gamma];

    pub fn package(self) -> &'static str {
        match self {
            AppRole::Alpha => "com.abc.storage_verifier_alpha",
            AppRole::Beta => "com.abc.storage_verifier_beta",
            AppRole::Gamma => "com.abc.storage_verifier_gamma",
        }
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.package())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_facet_pattern_includes_all_marker() {
        let facet: Facet<Scope> = Facet::all();
        assert_eq!(facet.pattern(), "(MY_APP|OTHER_APPS|ALL)");
        assert_eq!(facet.name(), "ALL");
        assert_eq!(Facet::One(Scope::MyApp).pattern(), "MY_APP");
    }

    #[test]
    fn all_facet_spans_the_universe() {
        assert_eq!(Facet::<StorageTier>::all().values(), StorageTier::ALL.to_vec());
        assert_eq!(Facet::<Collection>::all().values(), Collection::ALL.to_vec());
        let pattern = Facet::<StorageTier>::all().pattern();
        assert!(pattern.starts_with('(') && pattern.ends_with("|ALL)"));
    }

    #[test]
    fn rule_type_from_id_prefix() {
        assert_eq!(RuleType::from_rule_id("T2").unwrap(), RuleType::Integrity);
        assert_eq!(RuleType::from_rule_id("C1").unwrap(), RuleType::Confidentiality);
        assert!(RuleType::from_rule_id("X9").is_err());
    }

    #[test]
    fn attribute_keys_round_trip() {
        for a in Attribute::ALL {
            assert_eq!(a.key().parse::<Attribute>().unwrap(), a);
        }
    }
}
