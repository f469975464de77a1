//! File actions a test app can be asked to perform.
//!
//! Each action carries a behavior record (the flag the on-device activity listens for,
//! and the default parameter template over role variables) resolved through a lookup
//! table rather than per-variant code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Operation performed against a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Read,
    Create,
    Delete,
    Move,
    Rename,
    Overwrite,
}

/// Placeholder in a default parameter template, bound to a concrete role at run time.
///
/// `Alpha*` variables resolve against the subject of the action, `Beta*` against the
/// counterpart role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleVariable {
    AlphaPath,
    AlphaPath2,
    AlphaData,
    AlphaData2,
    BetaDirpath,
}

/// Parameter slots an action may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    Path,
    Data,
    MoveTo,
}

/// Static behavior of an action.
#[derive(Debug, Clone, Copy)]
pub struct ActionBehavior {
    pub flag: &'static str,
    pub default_params: &'static [(ParamSlot, RoleVariable)],
}

static BEHAVIORS: [(Action, ActionBehavior); 6] = [
    (
        Action::Read,
        ActionBehavior {
            flag: "READ_FILE",
            default_params: &[(ParamSlot::Path, RoleVariable::AlphaPath)],
        },
    ),
    (
        Action::Create,
        ActionBehavior {
            flag: "CREATE_FILE",
            default_params: &[
                (ParamSlot::Path, RoleVariable::AlphaPath),
                (ParamSlot::Data, RoleVariable::AlphaData),
            ],
        },
    ),
    (
        Action::Delete,
        ActionBehavior {
            flag: "DELETE_FILE",
            default_params: &[(ParamSlot::Path, RoleVariable::AlphaPath)],
        },
    ),
    (
        Action::Move,
        ActionBehavior {
            flag: "MOVE_FILE",
            default_params: &[
                (ParamSlot::Path, RoleVariable::AlphaPath),
                (ParamSlot::MoveTo, RoleVariable::BetaDirpath),
            ],
        },
    ),
    (
        Action::Rename,
        ActionBehavior {
            flag: "RENAME_FILE",
            default_params: &[
                (ParamSlot::Path, RoleVariable::AlphaPath),
                (ParamSlot::MoveTo, RoleVariable::AlphaPath2),
            ],
        },
    ),
    (
        Action::Overwrite,
        ActionBehavior {
            flag: "OVERWRITE_FILE",
            default_params: &[
                (ParamSlot::Path, RoleVariable::AlphaPath),
                (ParamSlot::Data, RoleVariable::AlphaData2),
            ],
        },
    ),
];

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Read,
        Action::Create,
        Action::Delete,
        Action::Move,
        Action::Rename,
        Action::Overwrite,
    ];

    pub fn behavior(self) -> &'static ActionBehavior {
        // The table is indexed in declaration order.
        &BEHAVIORS[self as usize].1
    }

    /// Device flag, e.g. `READ_FILE`.
    pub fn flag(self) -> &'static str {
        self.behavior().flag
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Read => "READ",
            Action::Create => "CREATE",
            Action::Delete => "DELETE",
            Action::Move => "MOVE",
            Action::Rename => "RENAME",
            Action::Overwrite => "OVERWRITE",
        }
    }

    /// Actions that leave the file at a new path.
    pub fn relocates(self) -> bool {
        matches!(self, Action::Create | Action::Rename | Action::Move)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = HarnessError;

    /// Accepts the action name (`MOVE`) or its flag (`MOVE_FILE`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.name() == upper || a.flag() == upper)
            .ok_or_else(|| HarnessError::UnknownAction(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_table_matches_variants() {
        for a in Action::ALL {
            assert!(a.flag().starts_with(a.name()));
        }
        assert_eq!(Action::Overwrite.flag(), "OVERWRITE_FILE");
    }

    #[test]
    fn parse_accepts_name_and_flag() {
        assert_eq!("rename".parse::<Action>().unwrap(), Action::Rename);
        assert_eq!("DELETE_FILE".parse::<Action>().unwrap(), Action::Delete);
        assert!(matches!("SETUP".parse::<Action>(), Err(HarnessError::UnknownAction(_))));
    }

    #[test]
    fn move_defaults_to_counterpart_dir() {
        let params = Action::Move.behavior().default_params;
        assert!(params.contains(&(ParamSlot::MoveTo, RoleVariable::BetaDirpath)));
    }
}
