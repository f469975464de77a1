//! Catalog-free parsing of a case's printable form.

use regex::Regex;

use crate::error::HarnessError;

const CASE_PATTERN: &str = r"^\[(?P<rule>[^\]]+)\] (?P<action>[A-Z]+)\((?P<api>[^)]+)\)->(?P<template>.*?)\((?P<ext>\.[A-Za-z0-9]+)\)_\[(?P<payload>.*)\]_\[(?P<perm>[0-9, ]*)\]_(?P<seed>[0-9]+)$";
const STEP_PATTERN: &str = r"'(?P<step>[A-Z]+),(?P<api>[^']+)'";

/// The fields of `[<rule>] <ACTION>(<API>)-><template>(<ext>)_[<steps>]_[<perm>]_<seed>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintableCase {
    pub rule_id: String,
    pub final_action: String,
    /// Upper-case API name of the final action.
    pub api: String,
    pub template: String,
    pub ext: String,
    /// (`SETUP` or action name, printable API name) per step.
    pub payload: Vec<(String, String)>,
    pub permission: Vec<u8>,
    pub seed: u64,
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern).map_err(|e| HarnessError::InvariantViolation(e.to_string()))
}

impl PrintableCase {
    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let case_re = compile(CASE_PATTERN)?;
        let caps = case_re
            .captures(text)
            .ok_or_else(|| HarnessError::MalformedCase(text.to_string()))?;
        let field = |name: &str| caps.name(name).map(|m| m.as_str().to_string()).unwrap_or_default();

        let step_re = compile(STEP_PATTERN)?;
        let raw_payload = field("payload");
        let payload: Vec<(String, String)> = step_re
            .captures_iter(&raw_payload)
            .map(|c| (c["step"].to_string(), c["api"].to_string()))
            .collect();
        let expected_steps = if raw_payload.trim().is_empty() { 0 } else { raw_payload.split(", ").count() };
        if payload.len() != expected_steps {
            return Err(HarnessError::MalformedCase(format!("unparseable payload: [{}]", raw_payload)));
        }

        let permission = field("perm")
            .split(',')
            .map(|v| v.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| HarnessError::MalformedCase(format!("bad permission vector in {}", text)))?;
        let seed = field("seed")
            .parse::<u64>()
            .map_err(|_| HarnessError::MalformedCase(format!("bad seed in {}", text)))?;

        Ok(PrintableCase {
            rule_id: field("rule"),
            final_action: field("action"),
            api: field("api"),
            template: field("template"),
            ext: field("ext"),
            payload,
            permission,
            seed,
        })
    }

    pub fn setup_index(&self) -> Option<usize> {
        self.payload.iter().position(|(step, _)| step == "SETUP")
    }

    /// Payload steps as printed, e.g. `SETUP,File`.
    pub fn payload_printable(&self) -> Vec<String> {
        self.payload.iter().map(|(s, a)| format!("{},{}", s, a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_fields() {
        let text = "[C2] READ(FILE)->/sdcard/Download/${p}_(.pdf)_['SETUP,File', 'DELETE,MediaStore@ContentResolver@IoStream']_[1, 1, 1, 1, 1]_10";
        let p = PrintableCase::parse(text).unwrap();
        assert_eq!(p.rule_id, "C2");
        assert_eq!(p.final_action, "READ");
        assert_eq!(p.api, "FILE");
        assert_eq!(p.template, "/sdcard/Download/${p}_");
        assert_eq!(p.ext, ".pdf");
        assert_eq!(p.payload.len(), 2);
        assert_eq!(p.payload[1].1, "MediaStore@ContentResolver@IoStream");
        assert_eq!(p.permission, vec![1, 1, 1, 1, 1]);
        assert_eq!(p.seed, 10);
        assert_eq!(p.setup_index(), Some(0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(PrintableCase::parse("not a case").is_err());
        assert!(PrintableCase::parse("[C2] READ(FILE)->/x(.txt)_['SETUP File']_[1, 1, 1, 1, 1]_1").is_err());
    }
}
