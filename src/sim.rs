//! An in-memory device modelling scoped storage, for tests and offline campaigns.
//!
//! App-specific directories belong to their package. Shared collections accept
//! creates from anyone; reading or writing another app's shared file needs the
//! picker, all-files access, or (for reads of media) the read permission.
//! Creating over an existing file fails through the file API and is auto-renamed
//! by the scoped APIs. Failed opens report `EACCES` for existing files and
//! `ENOENT` otherwise, as the platform does.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::action::Action;
use crate::capability::StorageApi;
use crate::oracle::observation::{Observation, EXCEPTION_PREFIX, FAIL, SUCCESS};
use crate::oracle::{ActionParams, Device, DeviceError};
use crate::permissions::{AppPermission, PermissionSetting};

/// Base of the simulated modification clock.
pub const MTIME_BASE: u64 = 1_700_000_000;

const APP_SPECIFIC_ROOTS: [&str; 2] = ["/sdcard/Android/data/", "/data/data/"];
const MEDIA_DIRS: [&str; 3] = ["/sdcard/Pictures/", "/sdcard/Movies/", "/sdcard/Music/"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimFile {
    pub owner: String,
    pub content: String,
    pub mtime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnExists {
    Fail,
    Rename,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone<'a> {
    AppSpecific(&'a str),
    Media,
    Shared,
}

fn zone(path: &str) -> Zone<'_> {
    for root in APP_SPECIFIC_ROOTS {
        if let Some(rest) = path.strip_prefix(root) {
            return Zone::AppSpecific(rest.split('/').next().unwrap_or(""));
        }
    }
    if MEDIA_DIRS.iter().any(|d| path.starts_with(d)) {
        Zone::Media
    } else {
        Zone::Shared
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Next free `name (n).ext` for `path`.
fn numbered(path: &str, n: usize) -> String {
    match path.rfind('.') {
        Some(dot) if dot > path.rfind('/').unwrap_or(0) => format!("{} ({}){}", &path[..dot], n, &path[dot..]),
        _ => format!("{} ({})", path, n),
    }
}

fn eacces(path: &str) -> String {
    format!("{}{}: open failed: EACCES (Permission denied)", EXCEPTION_PREFIX, path)
}

fn enoent(path: &str) -> String {
    format!("{}{}: open failed: ENOENT (No such file or directory)", EXCEPTION_PREFIX, path)
}

/// Simulated device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    files: BTreeMap<String, SimFile>,
    permissions: BTreeMap<String, PermissionSetting>,
    installed: BTreeSet<String>,
    root: bool,
    clock: u64,
    /// Failures returned by upcoming `execute` calls, in order.
    faults: VecDeque<DeviceError>,
    /// Count of actions executed, privileged ones included.
    pub executed: usize,
}

impl SimulatedDevice {
    pub fn new(root: bool) -> Self {
        SimulatedDevice { root, ..Default::default() }
    }

    /// Queues a failure for a later `execute` call.
    pub fn inject(&mut self, fault: DeviceError) {
        self.faults.push_back(fault);
    }

    pub fn file(&self, path: &str) -> Option<&SimFile> {
        self.files.get(path)
    }

    pub fn installed(&self) -> &BTreeSet<String> {
        &self.installed
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        MTIME_BASE + self.clock
    }

    fn effective(&self, package: &str) -> PermissionSetting {
        self.permissions.get(package).copied().unwrap_or(PermissionSetting::NONE).effective()
    }

    fn can_access(&self, package: &str, api: &StorageApi, path: &str, write: bool) -> bool {
        match zone(path) {
            Zone::AppSpecific(owner) => owner == package,
            z => {
                if self.files.get(path).map(|f| f.owner == package).unwrap_or(false) || api.is_saf_picker() {
                    return true;
                }
                let perms = self.effective(package);
                if perms.is_granted(AppPermission::ManageExternalStorage) && !api.is_media_store() {
                    return true;
                }
                !write && z == Zone::Media && perms.is_granted(AppPermission::ReadExternalStorage)
            }
        }
    }

    fn can_create(&self, package: &str, path: &str) -> bool {
        match zone(path) {
            Zone::AppSpecific(owner) => owner == package,
            _ => true,
        }
    }

    fn denied(&self, path: &str) -> String {
        if self.files.contains_key(path) {
            eacces(path)
        } else {
            enoent(path)
        }
    }

    fn free_name(&self, path: &str) -> String {
        let mut candidate = path.to_string();
        let mut n = 0;
        while self.files.contains_key(&candidate) {
            n += 1;
            candidate = numbered(path, n);
        }
        candidate
    }

    fn create(&mut self, owner: &str, path: &str, data: &str, on_exists: OnExists) -> Result<String, String> {
        let dest = match (self.files.contains_key(path), on_exists) {
            (false, _) | (true, OnExists::Replace) => path.to_string(),
            (true, OnExists::Rename) => self.free_name(path),
            (true, OnExists::Fail) => {
                return Err(format!("{}{}: open failed: EEXIST (File exists)", EXCEPTION_PREFIX, path));
            }
        };
        let mtime = self.tick();
        self.files.insert(dest.clone(), SimFile { owner: owner.to_string(), content: data.to_string(), mtime });
        Ok(dest)
    }

    fn relocate(&mut self, from: &str, to: &str) -> Result<String, String> {
        let Some(file) = self.files.remove(from) else {
            return Err(enoent(from));
        };
        let dest = self.free_name(to);
        self.files.insert(dest.clone(), file);
        Ok(dest)
    }

    fn move_target(params: &ActionParams) -> String {
        let dir = params.move_to.clone().unwrap_or_default();
        format!("{}{}", dir, file_name(&params.path))
    }

    fn outcome(action: Action, path: &str, key: &str, result: Result<String, String>) -> Observation {
        match result {
            Ok(v) => Observation::new(action, SUCCESS, path).with(key, v),
            Err(e) => Observation::new(action, FAIL, path).with(key, e),
        }
    }

    fn privileged_read(&self, path: &str) -> Observation {
        match self.files.get(path) {
            Some(f) => Observation::new(Action::Read, SUCCESS, path)
                .with("content", f.content.clone())
                .with("size", f.content.len().to_string())
                .with("modified_time", f.mtime.to_string()),
            None => Observation::new(Action::Read, FAIL, path)
                .with("content", format!("{}cat: {}: No such file or directory", EXCEPTION_PREFIX, path))
                .with("size", format!("{}wc: {}: No such file or directory", EXCEPTION_PREFIX, path))
                .with("modified_time", format!("{}stat: {}: No such file or directory", EXCEPTION_PREFIX, path)),
        }
    }
}

impl Device for SimulatedDevice {
    fn has_root(&mut self) -> bool {
        self.root
    }

    fn execute(
        &mut self,
        package: &str,
        action: Action,
        api: &StorageApi,
        params: &ActionParams,
    ) -> Result<Observation, DeviceError> {
        if let Some(fault) = self.faults.pop_front() {
            return Err(fault);
        }
        if !self.installed.contains(package) {
            return Err(DeviceError::Transport(format!("{} is not installed", package)));
        }
        self.executed += 1;
        let path = params.path.as_str();
        let data = params.data.clone().unwrap_or_default();
        let obs = match action {
            Action::Read => {
                if !self.files.contains_key(path) || !self.can_access(package, api, path, false) {
                    Observation::new(action, FAIL, path).with("content", self.denied(path))
                } else {
                    let content = self.files.get(path).map(|f| f.content.clone()).unwrap_or_default();
                    Observation::new(action, SUCCESS, path).with("content", content)
                }
            }
            Action::Create => {
                let result = if self.can_create(package, path) {
                    let on_exists = if api.is_file_api() { OnExists::Fail } else { OnExists::Rename };
                    self.create(package, path, &data, on_exists)
                } else {
                    Err(eacces(path))
                };
                Self::outcome(action, path, "edit_path", result)
            }
            Action::Delete => {
                let result = if self.files.contains_key(path) && self.can_access(package, api, path, true) {
                    self.files.remove(path);
                    Ok(path.to_string())
                } else {
                    Err(self.denied(path))
                };
                Self::outcome(action, path, "edit_path", result)
            }
            Action::Overwrite => {
                let result = if self.files.contains_key(path) && self.can_access(package, api, path, true) {
                    let mtime = self.tick();
                    if let Some(f) = self.files.get_mut(path) {
                        f.content = data;
                        f.mtime = mtime;
                    }
                    Ok(path.to_string())
                } else {
                    Err(self.denied(path))
                };
                Self::outcome(action, path, "edit_path", result)
            }
            Action::Move | Action::Rename => {
                let dest = if action == Action::Move {
                    Self::move_target(params)
                } else {
                    params.move_to.clone().unwrap_or_default()
                };
                let result = if self.files.contains_key(path)
                    && self.can_access(package, api, path, true)
                    && self.can_create(package, &dest)
                {
                    self.relocate(path, &dest)
                } else {
                    Err(self.denied(path))
                };
                Self::outcome(action, path, "edit_path", result)
            }
        };
        Ok(obs)
    }

    fn execute_privileged(
        &mut self,
        action: Action,
        params: &ActionParams,
        rename: bool,
    ) -> Result<Observation, DeviceError> {
        let path = params.path.as_str();
        if path.starts_with("/data/data") && !self.root {
            return Err(DeviceError::Transport("Root permission is required".into()));
        }
        self.executed += 1;
        let obs = match action {
            Action::Read => self.privileged_read(path),
            Action::Create => {
                let data = params.data.clone().unwrap_or_default();
                let owner = match zone(path) {
                    Zone::AppSpecific(owner) => owner.to_string(),
                    _ => "root".to_string(),
                };
                let on_exists = if rename { OnExists::Rename } else { OnExists::Replace };
                let result = self.create(&owner, path, &data, on_exists);
                Self::outcome(action, path, "edit_path", result)
            }
            Action::Delete => {
                let result = self.files.remove(path).map(|_| path.to_string()).ok_or_else(|| enoent(path));
                let mut obs = Self::outcome(action, path, "edit_path", result);
                obs.result.extend(self.privileged_read(path).result);
                obs
            }
            Action::Overwrite => {
                let data = params.data.clone().unwrap_or_default();
                let mtime = self.tick();
                let result = match self.files.get_mut(path) {
                    Some(f) => {
                        f.content = data;
                        f.mtime = mtime;
                        Ok(path.to_string())
                    }
                    None => Err(enoent(path)),
                };
                let mut obs = Self::outcome(action, path, "edit_path", result);
                obs.result.extend(self.privileged_read(path).result);
                obs
            }
            Action::Move | Action::Rename => {
                let dest = if action == Action::Move {
                    Self::move_target(params)
                } else {
                    params.move_to.clone().unwrap_or_default()
                };
                let result = self.relocate(path, &dest);
                Self::outcome(action, path, "edit_path", result)
            }
        };
        Ok(obs)
    }

    fn available_name(&mut self, path: &str) -> Result<String, DeviceError> {
        Ok(self.free_name(path))
    }

    fn reset_app_storage(&mut self, package: &str) -> Result<(), DeviceError> {
        self.files.retain(|path, _| zone(path) != Zone::AppSpecific(package));
        Ok(())
    }

    fn reset_shared_storage(&mut self) -> Result<(), DeviceError> {
        self.files.retain(|path, _| matches!(zone(path), Zone::AppSpecific(_)));
        Ok(())
    }

    fn set_permissions(&mut self, package: &str, setting: PermissionSetting, _ext: &str) -> Result<(), DeviceError> {
        self.permissions.insert(package.to_string(), setting);
        Ok(())
    }

    fn install_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.installed.insert(package.to_string());
        Ok(())
    }

    fn remove_app(&mut self, package: &str) -> Result<(), DeviceError> {
        self.installed.remove(package);
        self.permissions.remove(package);
        Ok(())
    }
}
