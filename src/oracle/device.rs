//! The device collaborator.
//!
//! The oracle depends only on this contract; shell transport, UI automation and
//! on-device file operations live behind it.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::capability::StorageApi;
use crate::oracle::observation::Observation;
use crate::oracle::operator::ActionParams;
use crate::permissions::PermissionSetting;

/// Failures reported by a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Device unreachable or an unexpected shell error. Aborts the campaign.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The test app never reported a result.
    #[error("no result before timeout: {0}")]
    Timeout(String),
    /// The reported result could not be parsed.
    #[error("malformed device response: {0}")]
    Malformed(String),
}

impl DeviceError {
    /// Timeouts and malformed responses are outcomes of a probe, not faults of the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DeviceError::Transport(_))
    }
}

/// A device under test. Stateful and used by one campaign at a time.
pub trait Device {
    /// Whether privileged observations of internal storage are possible.
    fn has_root(&mut self) -> bool;

    /// Asks the test app `package` to perform `action` through `api`.
    fn execute(
        &mut self,
        package: &str,
        action: Action,
        api: &StorageApi,
        params: &ActionParams,
    ) -> Result<Observation, DeviceError>;

    /// Performs `action` with unrestricted access. With `rename`, a destination that
    /// already exists is replaced by the next free name.
    fn execute_privileged(
        &mut self,
        action: Action,
        params: &ActionParams,
        rename: bool,
    ) -> Result<Observation, DeviceError>;

    /// First free name for `path`, following the platform's ` (n)` suffix scheme.
    fn available_name(&mut self, path: &str) -> Result<String, DeviceError> {
        Ok(path.to_string())
    }

    fn reset_app_storage(&mut self, package: &str) -> Result<(), DeviceError>;

    fn reset_shared_storage(&mut self) -> Result<(), DeviceError>;

    /// Grants exactly the permissions in `setting`. `ext` selects media-specific grants.
    fn set_permissions(&mut self, package: &str, setting: PermissionSetting, ext: &str) -> Result<(), DeviceError>;

    fn install_app(&mut self, package: &str) -> Result<(), DeviceError>;

    fn remove_app(&mut self, package: &str) -> Result<(), DeviceError>;
}

/// Bounded retry for recoverable device failures, with linearly increasing waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, backoff_ms: 1000 }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// Returns `Ok(None)` when every attempt ended in a recoverable failure.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, DeviceError>,
    ) -> Result<Option<T>, DeviceError> {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match op() {
                Ok(v) => return Ok(Some(v)),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(attempt, max = attempts, error = %e, "device did not answer, retrying");
                    if attempt < attempts && self.backoff_ms > 0 {
                        thread::sleep(Duration::from_millis(self.backoff_ms * u64::from(attempt)));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
