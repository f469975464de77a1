//!
//! Runtime permission model for the test apps.
//! Defines the permission bits a rule can grant, the ordered 5-element setting vector
//! used in case identities, and the implied-grant closure the OS applies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Permission bits in the order they appear in a setting vector.
pub mod bits {
    /// Read GPS metadata of media files.
    pub const ACCESS_MEDIA_LOCATION: u8 = 1 << 0;
    /// Legacy read access to shared storage.
    pub const READ_EXTERNAL_STORAGE: u8 = 1 << 1;
    /// All-files access. Implies `READ_EXTERNAL_STORAGE` and `WRITE_EXTERNAL_STORAGE`.
    pub const MANAGE_EXTERNAL_STORAGE: u8 = 1 << 2;
    /// Legacy write access to shared storage. Implies `READ_EXTERNAL_STORAGE`.
    pub const WRITE_EXTERNAL_STORAGE: u8 = 1 << 3;
    /// Signature-level media write access.
    pub const WRITE_MEDIA_STORAGE: u8 = 1 << 4;
}

/// A single runtime permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AppPermission {
    AccessMediaLocation,
    ReadExternalStorage,
    ManageExternalStorage,
    WriteExternalStorage,
    WriteMediaStorage,
}

impl AppPermission {
    /// Vector order.
    pub const ORDER: [AppPermission; 5] = [
        AppPermission::AccessMediaLocation,
        AppPermission::ReadExternalStorage,
        AppPermission::ManageExternalStorage,
        AppPermission::WriteExternalStorage,
        AppPermission::WriteMediaStorage,
    ];

    pub fn bit(self) -> u8 {
        match self {
            AppPermission::AccessMediaLocation => bits::ACCESS_MEDIA_LOCATION,
            AppPermission::ReadExternalStorage => bits::READ_EXTERNAL_STORAGE,
            AppPermission::ManageExternalStorage => bits::MANAGE_EXTERNAL_STORAGE,
            AppPermission::WriteExternalStorage => bits::WRITE_EXTERNAL_STORAGE,
            AppPermission::WriteMediaStorage => bits::WRITE_MEDIA_STORAGE,
        }
    }

    /// Fully qualified platform name.
    pub fn qualified_name(self) -> &'static str {
        match self {
            AppPermission::AccessMediaLocation => "android.permission.ACCESS_MEDIA_LOCATION",
            AppPermission::ReadExternalStorage => "android.permission.READ_EXTERNAL_STORAGE",
            AppPermission::ManageExternalStorage => "android.permission.MANAGE_EXTERNAL_STORAGE",
            AppPermission::WriteExternalStorage => "android.permission.WRITE_EXTERNAL_STORAGE",
            AppPermission::WriteMediaStorage => "android.permission.WRITE_MEDIA_STORAGE",
        }
    }
}

/// An ordered permission vector, stored as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "[u8; 5]", try_from = "Vec<u8>")]
pub struct PermissionSetting(u8);

impl PermissionSetting {
    /// Nothing granted.
    pub const NONE: PermissionSetting = PermissionSetting(0);
    /// Everything granted.
    pub const ALL: PermissionSetting = PermissionSetting(0b1_1111);

    /// Builds a setting from its vector form, e.g. `[0, 1, 0, 0, 0]`.
    ///
    /// # Errors
    /// Returns `HarnessError::Config` if the slice is not exactly five 0/1 entries.
    pub fn from_array(values: &[u8]) -> Result<Self, HarnessError> {
        if values.len() != AppPermission::ORDER.len() {
            return Err(HarnessError::Config(format!(
                "permission vector must have {} entries, got {}",
                AppPermission::ORDER.len(),
                values.len()
            )));
        }
        let mut mask = 0u8;
        for (perm, v) in AppPermission::ORDER.iter().zip(values) {
            match v {
                0 => {}
                1 => mask |= perm.bit(),
                other => {
                    return Err(HarnessError::Config(format!(
                        "permission vector entries must be 0 or 1, got {}",
                        other
                    )))
                }
            }
        }
        Ok(PermissionSetting(mask))
    }

    pub fn to_array(self) -> [u8; 5] {
        let mut out = [0u8; 5];
        for (slot, perm) in out.iter_mut().zip(AppPermission::ORDER) {
            *slot = u8::from(self.is_granted(perm));
        }
        out
    }

    #[inline]
    pub fn is_granted(self, perm: AppPermission) -> bool {
        self.0 & perm.bit() == perm.bit()
    }

    pub fn with(self, perm: AppPermission) -> Self {
        PermissionSetting(self.0 | perm.bit())
    }

    /// `{"android.permission.X": granted}` for every permission.
    pub fn to_printable(self) -> BTreeMap<String, bool> {
        AppPermission::ORDER
            .iter()
            .map(|p| (p.qualified_name().to_string(), self.is_granted(*p)))
            .collect()
    }

    /// Adds the grants the OS implies: all-files access grants read and write,
    /// write grants read.
    pub fn effective(self) -> Self {
        let mut m = self.0;
        if m & bits::MANAGE_EXTERNAL_STORAGE != 0 {
            m |= bits::READ_EXTERNAL_STORAGE | bits::WRITE_EXTERNAL_STORAGE;
        }
        if m & bits::WRITE_EXTERNAL_STORAGE != 0 {
            m |= bits::READ_EXTERNAL_STORAGE;
        }
        PermissionSetting(m)
    }
}

impl fmt::Display for PermissionSetting {
    /// Vector form as printed in case identities: `[1, 1, 0, 1, 1]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.to_array().iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

impl From<PermissionSetting> for [u8; 5] {
    fn from(value: PermissionSetting) -> Self {
        value.to_array()
    }
}

impl TryFrom<Vec<u8>> for PermissionSetting {
    type Error = HarnessError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        PermissionSetting::from_array(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_array_orders_bits() {
        let s = PermissionSetting::from_array(&[0, 1, 0, 0, 0]).unwrap();
        assert!(s.is_granted(AppPermission::ReadExternalStorage));
        assert!(!s.is_granted(AppPermission::AccessMediaLocation));
        assert_eq!(s.to_array(), [0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_from_array_rejects_bad_input() {
        assert!(PermissionSetting::from_array(&[1, 1, 1]).is_err());
        assert!(PermissionSetting::from_array(&[0, 2, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_display_matches_vector_form() {
        assert_eq!(PermissionSetting::ALL.to_string(), "[1, 1, 1, 1, 1]");
        let s = PermissionSetting::from_array(&[1, 1, 0, 1, 1]).unwrap();
        assert_eq!(s.to_string(), "[1, 1, 0, 1, 1]");
    }

    #[test]
    fn test_effective_manage_implies_read_write() {
        let s = PermissionSetting::NONE.with(AppPermission::ManageExternalStorage).effective();
        assert!(s.is_granted(AppPermission::ReadExternalStorage));
        assert!(s.is_granted(AppPermission::WriteExternalStorage));
        assert!(!s.is_granted(AppPermission::AccessMediaLocation));
    }

    #[test]
    fn test_printable_uses_qualified_names() {
        let p = PermissionSetting::NONE.with(AppPermission::ManageExternalStorage).to_printable();
        assert_eq!(p.len(), 5);
        assert_eq!(p.get("android.permission.MANAGE_EXTERNAL_STORAGE"), Some(&true));
        assert_eq!(p.get("android.permission.WRITE_MEDIA_STORAGE"), Some(&false));
    }

    #[test]
    fn test_serde_uses_vector_form() {
        let s = PermissionSetting::from_array(&[0, 1, 1, 0, 0]).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "[0,1,1,0,0]");
        let back: PermissionSetting = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
