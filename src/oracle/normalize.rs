//!
//! Normalization and equivalence of observations.
//!
//! Two observations are equivalent when, after an ordered list of token
//! replacements neutralizes expected differences (random file-name suffixes of
//! sibling paths, directory aliases, timestamp skew), their result maps,
//! targets and success flags agree. String values are truncated before comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::oracle::observation::{Observation, EXCEPTION_PREFIX};
use crate::types::Attribute;

/// Bound applied to string values before comparison.
pub const TRUNCATE_LIMIT: usize = 900;

const PATH_ALIASES: [(&str, &str); 2] = [("/storage/emulated/0", "/sdcard"), ("/data/user/0", "/data/data")];

fn canonical_path(path: &str) -> String {
    PATH_ALIASES.iter().fold(path.to_string(), |p, (from, to)| p.replace(from, to))
}

/// Reduces a raw device observation to the attributes a rule observes.
///
/// Paths are canonicalized, line endings unified and a trailing newline on file
/// content stripped. Exception values are dropped unless exceptions are observed;
/// the success flag is dropped unless success is observed.
pub fn normalize(raw: Observation, observed: &BTreeSet<Attribute>) -> Observation {
    let keep_exceptions = observed.contains(&Attribute::Exception);
    let mut result = BTreeMap::new();
    for (key, value) in raw.result {
        if !observed.iter().any(|a| a.key() == key) {
            continue;
        }
        let value = match value {
            Value::String(s) => {
                if s.starts_with(EXCEPTION_PREFIX) && !keep_exceptions {
                    continue;
                }
                let mut s = s.replace("\r\n", "\n");
                if key == Attribute::EditPath.key() {
                    s = canonical_path(&s);
                }
                if key == Attribute::Content.key() && s.ends_with('\n') {
                    s.pop();
                }
                Value::String(s)
            }
            Value::Object(_) => value,
            other => Value::String(value_text(&other)),
        };
        result.insert(key, value);
    }
    Observation {
        action: raw.action,
        success: raw.success.filter(|_| observed.contains(&Attribute::Success)),
        target: raw.target.map(|t| canonical_path(&t)),
        result,
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Edit path as reported by the device, canonicalized but not filtered.
pub fn raw_edit_path(raw: &Observation) -> Option<String> {
    raw.edit_path().map(canonical_path)
}

/// Ordered `(pattern, substitute)` pairs applied to the serialized form of an
/// observation.
///
/// Each substitution is kept only if the text still parses as JSON afterwards.
/// Re-inserting an existing pattern updates its substitute in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Replacements(Vec<(String, String)>);

impl Replacements {
    pub fn new() -> Self {
        Replacements(Vec::new())
    }

    pub fn insert(&mut self, pattern: impl Into<String>, substitute: impl Into<String>) {
        let pattern = pattern.into();
        let substitute = substitute.into();
        if pattern.is_empty() {
            return;
        }
        match self.0.iter_mut().find(|(p, _)| *p == pattern) {
            Some(entry) => entry.1 = substitute,
            None => self.0.push((pattern, substitute)),
        }
    }

    /// Adds `pattern -> substitute` for the random tokens of two paths, when both have one.
    pub fn insert_tokens(&mut self, from_path: &str, to_path: &str) {
        if let (Some(a), Some(b)) = (extract_rand_from_path(from_path), extract_rand_from_path(to_path)) {
            self.insert(a, b);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn apply(&self, value: &Value) -> Value {
        if self.0.is_empty() {
            return value.clone();
        }
        let mut text = value.to_string();
        for (pattern, substitute) in &self.0 {
            let candidate = text.replace(pattern.as_str(), substitute);
            if serde_json::from_str::<Value>(&candidate).is_ok() {
                text = candidate;
            }
        }
        serde_json::from_str(&text).unwrap_or_else(|_| value.clone())
    }
}

/// Truncates every string in nested objects to `limit` characters.
pub fn truncate_strings(value: &mut Value, limit: usize) {
    if let Value::Object(map) = value {
        for v in map.values_mut() {
            match v {
                Value::String(s) => {
                    if let Some((idx, _)) = s.char_indices().nth(limit) {
                        s.truncate(idx);
                    }
                }
                Value::Object(_) => truncate_strings(v, limit),
                _ => {}
            }
        }
    }
}

/// Attributes on which two observations disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub count: usize,
    pub elements: BTreeSet<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn unwrap_observation(v: &Value) -> &Value {
    v.get("root-observation").unwrap_or(v)
}

fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|x| match x {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Object(m) => !m.is_empty(),
        _ => true,
    })
}

/// Structural diff over result keys, then `target` and `success` when both sides carry them.
pub fn count_diff(a: &Value, b: &Value) -> DiffResult {
    let obs_a = unwrap_observation(a);
    let obs_b = unwrap_observation(b);
    let res_a = obs_a.get("result").unwrap_or(obs_a);
    let res_b = obs_b.get("result").unwrap_or(obs_b);
    let empty = serde_json::Map::new();
    let map_a = res_a.as_object().unwrap_or(&empty);
    let map_b = res_b.as_object().unwrap_or(&empty);

    let mut elements = BTreeSet::new();
    let keys: BTreeSet<&String> = map_a.keys().chain(map_b.keys()).collect();
    for key in keys {
        if map_a.get(key) != map_b.get(key) {
            elements.insert(key.clone());
        }
    }
    for field in ["target", "success"] {
        if let (Some(x), Some(y)) = (present(obs_a.get(field)), present(obs_b.get(field))) {
            if x != y {
                elements.insert(field.to_string());
            }
        }
    }
    DiffResult { count: elements.len(), elements }
}

/// Replacement, truncation and diff, in that order.
pub fn diff(a: &Value, b: &Value, replacements: &Replacements) -> DiffResult {
    let mut a = replacements.apply(a);
    let mut b = replacements.apply(b);
    truncate_strings(&mut a, TRUNCATE_LIMIT);
    truncate_strings(&mut b, TRUNCATE_LIMIT);
    count_diff(&a, &b)
}

pub fn same_feedback(a: &Value, b: &Value, replacements: &Replacements) -> bool {
    diff(a, b, replacements).is_empty()
}

/// The 10-character random token a generated file name carries.
pub fn extract_rand_from_path(path: &str) -> Option<String> {
    static RAND_TOKEN: LazyLock<Option<Regex>> =
        LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]([a-zA-Z0-9]{10})(.| )").ok());
    RAND_TOKEN.as_ref()?.captures(path).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::oracle::observation::{FAIL, SUCCESS};
    use serde_json::json;

    fn all() -> BTreeSet<Attribute> {
        Attribute::ALL.into_iter().collect()
    }

    #[test]
    fn normalize_canonicalizes_and_filters() {
        let raw = Observation::new(Action::Read, SUCCESS, "/storage/emulated/0/Download/a.txt")
            .with("content", "line\r\nnext\n")
            .with("edit_path", "/storage/emulated/0/Download/a.txt")
            .with("size", json!(12))
            .with("bogus", "x");
        let n = normalize(raw, &all());
        assert_eq!(n.get_str("content"), Some("line\nnext"));
        assert_eq!(n.edit_path(), Some("/sdcard/Download/a.txt"));
        assert_eq!(n.get_str("size"), Some("12"));
        assert!(!n.result.contains_key("bogus"));
        assert_eq!(n.target.as_deref(), Some("/sdcard/Download/a.txt"));
    }

    #[test]
    fn normalize_drops_exceptions_and_success_unless_observed() {
        let observed: BTreeSet<Attribute> = [Attribute::Content, Attribute::EditPath].into_iter().collect();
        let raw = Observation::new(Action::Read, FAIL, "/x").with("content", "EXCEPTION: EACCES");
        let n = normalize(raw, &observed);
        assert!(n.result.is_empty());
        assert_eq!(n.success, None);
    }

    #[test]
    fn replacement_keeps_json_valid() {
        let mut r = Replacements::new();
        r.insert("\"", "");
        r.insert("abc", "xyz");
        let out = r.apply(&json!({"result": {"edit_path": "/sdcard/abc.txt"}}));
        assert_eq!(out["result"]["edit_path"], "/sdcard/xyz.txt");
    }

    #[test]
    fn replacement_insert_updates_in_place() {
        let mut r = Replacements::new();
        r.insert("a", "b");
        r.insert("c", "d");
        r.insert("a", "e");
        assert_eq!(r.pairs(), &[("a".to_string(), "e".to_string()), ("c".to_string(), "d".to_string())]);
    }

    #[test]
    fn diff_unwraps_privileged_and_counts_fields() {
        let a = json!({"root-observation": {"success": "SUCCESS", "target": "/a", "result": {"content": "x"}}});
        let b = json!({"success": "FAIL", "target": "/a", "result": {}});
        let d = diff(&a, &b, &Replacements::new());
        assert_eq!(d.count, 2);
        assert!(d.elements.contains("content") && d.elements.contains("success"));
    }

    #[test]
    fn truncation_hides_tail_differences() {
        let long_a = "a".repeat(TRUNCATE_LIMIT) + "tail-a";
        let long_b = "a".repeat(TRUNCATE_LIMIT) + "tail-b";
        let a = json!({"result": {"content": long_a}});
        let b = json!({"result": {"content": long_b}});
        assert!(same_feedback(&a, &b, &Replacements::new()));
    }

    #[test]
    fn extracts_random_token() {
        assert_eq!(
            extract_rand_from_path("/sdcard/Download/storage_verifier_alpha_Ab3dE6gH9k.txt").as_deref(),
            Some("Ab3dE6gH9k")
        );
        assert_eq!(extract_rand_from_path("/sdcard/a.txt"), None);
    }

    #[test]
    fn random_token_is_stable_across_calls() {
        let path = "/sdcard/Pictures/gamma_Zq81Lk0pXw.jpg";
        let first = extract_rand_from_path(path);
        assert_eq!(first.as_deref(), Some("Zq81Lk0pXw"));
        for _ in 0..3 {
            assert_eq!(extract_rand_from_path(path), first);
        }
    }
}
