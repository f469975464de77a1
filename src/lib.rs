#![forbid(unsafe_code)]
#![deny(deprecated)]

//!
//! Scope-Verif is a differential security-testing harness for scoped storage.
//!
//! Access-control expectations are written as declarative rules (availability,
//! integrity, confidentiality). The crate enumerates executable cases for those
//! rules across every storage API, samples a campaign, runs each case against a
//! device through a differential oracle, scores and persists the outcome, and
//! categorizes the violations found.

// Shared enums: storage facets, rule types, observed attributes, app roles.
pub mod types;

// Runtime permission vectors.
pub mod permissions;

// File actions and their device parameter templates.
pub mod action;

// Storage targets, APIs, rules and the catalog that owns them.
pub mod capability;

// Case identity and payloads.
pub mod case;

pub mod generator;
pub mod sampling;

// Device seam, normalization and the per-rule protocols.
pub mod oracle;

pub mod scoring;
pub mod categorize;
pub mod verifier;
pub mod report;
pub mod config;

pub mod error;

#[cfg(any(test, feature = "test-utils"))]
pub mod sim;

pub use error::{HarnessError, Result};
