//! What the device reports back for one action.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;

pub const SUCCESS: &str = "SUCCESS";
pub const FAIL: &str = "FAIL";
/// Prefix the device puts on attribute values produced by a failed call.
pub const EXCEPTION_PREFIX: &str = "EXCEPTION: ";
/// Placeholder recorded for an attribute that could not be observed.
pub const UNOBSERVED: &str = "false";

/// One observation of a file, as reported by a test app or a privileged shell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Attribute name to observed value.
    #[serde(default)]
    pub result: BTreeMap<String, Value>,
}

impl Observation {
    pub fn new(action: Action, success: &str, target: &str) -> Self {
        Observation {
            action: Some(action.flag().to_string()),
            success: Some(success.to_string()),
            target: Some(target.to_string()),
            result: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.result.insert(key.to_string(), value.into());
        self
    }

    /// Definitive observation recorded when the device never answered.
    pub fn unanswered(action: Action, target: &str) -> Self {
        let key = if action == Action::Read { "content" } else { "edit_path" };
        Observation::new(action, FAIL, target).with(key, UNOBSERVED)
    }

    pub fn succeeded(&self) -> bool {
        self.success.as_deref() == Some(SUCCESS)
    }

    pub fn failed(&self) -> bool {
        self.success.as_deref() == Some(FAIL)
    }

    pub fn edit_path(&self) -> Option<&str> {
        self.result.get("edit_path").and_then(Value::as_str)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.result.get(key).and_then(Value::as_str)
    }
}

/// Whether a reported path can stand in for the original one.
pub fn usable_path(path: Option<&str>) -> Option<&str> {
    path.filter(|p| !p.is_empty() && *p != UNOBSERVED && !p.contains(EXCEPTION_PREFIX))
}

/// An observation as it enters a comparison.
///
/// Relocating final actions are judged by what a privileged read of the resulting
/// path shows, not by what the app reported; those are wrapped as `Privileged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feedback {
    Privileged {
        #[serde(rename = "root-observation")]
        observation: Observation,
    },
    Direct(Observation),
}

impl Feedback {
    pub fn observation(&self) -> &Observation {
        match self {
            Feedback::Privileged { observation } | Feedback::Direct(observation) => observation,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Feedback::Privileged { .. })
    }

    /// Success flag of the wrapped observation, `None` when it was filtered out.
    pub fn success(&self) -> Option<&str> {
        self.observation().success.as_deref()
    }

    pub fn to_value(&self) -> Value {
        // Plain data structures always serialize.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Default for Feedback {
    fn default() -> Self {
        Feedback::Direct(Observation::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanswered_read_reports_content() {
        let o = Observation::unanswered(Action::Read, "/sdcard/Download/a.txt");
        assert!(o.failed());
        assert_eq!(o.get_str("content"), Some(UNOBSERVED));
        let o = Observation::unanswered(Action::Move, "/sdcard/Download/a.txt");
        assert_eq!(o.edit_path(), Some(UNOBSERVED));
        assert_eq!(o.action.as_deref(), Some("MOVE_FILE"));
    }

    #[test]
    fn privileged_feedback_uses_root_key() {
        let fb = Feedback::Privileged { observation: Observation::new(Action::Read, SUCCESS, "/x") };
        let v = fb.to_value();
        assert!(v.get("root-observation").is_some());
        let back: Feedback = serde_json::from_value(v).unwrap();
        assert!(back.is_privileged());
        let direct: Feedback = serde_json::from_str(r#"{"success":"FAIL","result":{}}"#).unwrap();
        assert!(!direct.is_privileged());
    }

    #[test]
    fn usable_path_rejects_placeholders() {
        assert_eq!(usable_path(Some("/sdcard/a (1).txt")), Some("/sdcard/a (1).txt"));
        assert_eq!(usable_path(Some("false")), None);
        assert_eq!(usable_path(Some("EXCEPTION: denied")), None);
        assert_eq!(usable_path(None), None);
    }
}
