//!
//! Defines error types for the verification harness.

use crate::oracle::DeviceError;

/// Represents errors that abort case generation, planning or a verification campaign.
///
/// Policy-level mismatches are never errors; they are recorded as case results.
/// Everything here is fatal for the current run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A rule id that is not registered in the catalog.
    #[error("Unknown rule id: {0}")]
    UnknownRule(String),
    /// An action name that does not map to a known action.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    /// An API name that does not map to a catalog entry.
    #[error("Unknown storage api: {0}")]
    UnknownApi(String),
    /// A serialized case could not be split into its fields.
    #[error("Malformed case: {0}")]
    MalformedCase(String),
    /// The device collaborator failed at the transport level.
    #[error("Device failure: {0}")]
    Device(#[from] DeviceError),
    /// The oracle could not establish a baseline observation for a case.
    #[error("Missing reference observation for case {0}")]
    MissingReference(String),
    /// A dependency case was not recorded before its dependent executed.
    #[error("Prerequisite {prerequisite} of case {case} has not been recorded")]
    UnmetPrerequisite { case: String, prerequisite: String },
    /// Invalid run parameters.
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// An internal invariant did not hold.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
