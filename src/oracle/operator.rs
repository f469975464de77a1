//! Per-role file names, data tokens and action parameters.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::action::{Action, ParamSlot, RoleVariable};
use crate::capability::PathTemplate;
use crate::types::AppRole;

/// Length of the random token in generated names and data.
pub const TOKEN_LEN: usize = 10;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Deterministic token derived from the case identity and a label.
pub fn token(seed: u64, case_printable: &str, label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_string().as_bytes());
    hasher.update(case_printable.as_bytes());
    hasher.update(label.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut rng = ChaCha20Rng::from_seed(digest);
    (0..TOKEN_LEN).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

/// Concrete variables of one app role for one case.
///
/// `path` through `path6` are sibling files under the role's rendered template.
/// `path` and `path3` may be replaced once the device reports where a file really landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub package: String,
    pub data: String,
    pub data2: String,
    pub path: String,
    pub path2: String,
    pub path3: String,
    pub path4: String,
    pub path5: String,
    pub path6: String,
    pub dirpath: String,
    pub dirpath2: String,
}

impl Operator {
    pub fn new(role: AppRole, template: &PathTemplate, ext: &str, seed: u64, case_printable: &str) -> Self {
        let package = role.package();
        let base = template.render(package);
        let tok = |label: &str| token(seed, case_printable, &format!("{}-{}", package, label));
        let file = |label: &str| format!("{}{}{}", base, tok(label), ext);
        let dirpath = format!("/sdcard/Android/data/{}/", package);
        Operator {
            package: package.to_string(),
            data: tok("data"),
            data2: tok("data2"),
            path: file("path"),
            path2: file("path2"),
            path3: file("path3"),
            path4: file("path4"),
            path5: file("path5"),
            path6: file("path6"),
            dirpath2: format!("{}files/", dirpath),
            dirpath,
        }
    }

    fn variable(&self, var: RoleVariable) -> &str {
        match var {
            RoleVariable::AlphaPath => &self.path,
            RoleVariable::AlphaPath2 => &self.path2,
            RoleVariable::AlphaData => &self.data,
            RoleVariable::AlphaData2 => &self.data2,
            RoleVariable::BetaDirpath => &self.dirpath,
        }
    }
}

/// Parameters passed to the device for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParams {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to: Option<String>,
}

impl ActionParams {
    /// Binds the action's default template: `Alpha*` variables to `alpha`, `Beta*` to `beta`.
    pub fn for_action(action: Action, alpha: &Operator, beta: &Operator) -> Self {
        let mut params = ActionParams::default();
        for (slot, var) in action.behavior().default_params {
            let source = match var {
                RoleVariable::BetaDirpath => beta,
                _ => alpha,
            };
            let value = source.variable(*var).to_string();
            match slot {
                ParamSlot::Path => params.path = value,
                ParamSlot::Data => params.data = Some(value),
                ParamSlot::MoveTo => params.move_to = Some(value),
            }
        }
        params
    }

    pub fn create(path: &str, data: &str) -> Self {
        ActionParams { path: path.to_string(), data: Some(data.to_string()), move_to: None }
    }

    pub fn read(path: &str) -> Self {
        ActionParams { path: path.to_string(), data: None, move_to: None }
    }

    /// Overrides the path.
    pub fn at(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Overrides the data slot, only if the action takes data.
    pub fn with_data(mut self, data: &str) -> Self {
        if self.data.is_some() {
            self.data = Some(data.to_string());
        }
        self
    }

    /// Overrides the destination slot, only if the action takes one.
    pub fn with_move_to(mut self, move_to: &str) -> Self {
        if self.move_to.is_some() {
            self.move_to = Some(move_to.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StorageTarget;
    use crate::types::{Collection, Scope, StorageTier};

    fn template() -> PathTemplate {
        StorageTarget::new(StorageTier::External, Collection::SharedDownload, Scope::OtherApps)
            .get_paths()
            .remove(0)
    }

    #[test]
    fn variables_are_deterministic_and_distinct() {
        let a = Operator::new(AppRole::Alpha, &template(), ".txt", 10, "[T1] case");
        let b = Operator::new(AppRole::Alpha, &template(), ".txt", 10, "[T1] case");
        assert_eq!(a, b);
        assert_ne!(a.path, a.path3);
        assert!(a.path.starts_with("/sdcard/Download/storage_verifier_alpha_"));
        assert!(a.path.ends_with(".txt"));
        assert_eq!(a.data.len(), TOKEN_LEN);
        assert_eq!(a.dirpath2, "/sdcard/Android/data/com.abc.storage_verifier_alpha/files/");
        let other = Operator::new(AppRole::Alpha, &template(), ".txt", 11, "[T1] case");
        assert_ne!(a.path, other.path);
    }

    #[test]
    fn params_bind_roles_and_respect_slots() {
        let alpha = Operator::new(AppRole::Alpha, &template(), ".txt", 1, "c");
        let gamma = Operator::new(AppRole::Gamma, &template(), ".txt", 1, "c");
        let mv = ActionParams::for_action(Action::Move, &alpha, &gamma);
        assert_eq!(mv.path, alpha.path);
        assert_eq!(mv.move_to.as_deref(), Some(gamma.dirpath.as_str()));
        let del = ActionParams::for_action(Action::Delete, &alpha, &gamma).with_data("x").with_move_to("y");
        assert_eq!(del.data, None);
        assert_eq!(del.move_to, None);
        let ow = ActionParams::for_action(Action::Overwrite, &alpha, &gamma);
        assert_eq!(ow.data.as_deref(), Some(alpha.data2.as_str()));
    }
}
