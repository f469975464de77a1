//! Attack payloads: ordered steps performed before a case's final action.

use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::capability::StorageApi;

/// Marker printed for the setup step.
pub const SETUP: &str = "SETUP";

/// What a payload step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    /// Creates the file the case is about.
    Setup,
    /// An attacker (or resource owner) action against that file.
    Act(Action),
}

impl StepKind {
    /// The action performed on the device; setup is a create.
    pub fn device_action(self) -> Action {
        match self {
            StepKind::Setup => Action::Create,
            StepKind::Act(a) => a,
        }
    }
}

/// A single (step, api) entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadStep {
    pub kind: StepKind,
    pub api: Arc<StorageApi>,
}

impl PayloadStep {
    pub fn setup(api: Arc<StorageApi>) -> Self {
        PayloadStep { kind: StepKind::Setup, api }
    }

    pub fn act(action: Action, api: Arc<StorageApi>) -> Self {
        PayloadStep { kind: StepKind::Act(action), api }
    }

    pub fn is_setup(&self) -> bool {
        self.kind == StepKind::Setup
    }

    /// `SETUP,File` or `MOVE,MediaStore@ContentResolver@IoStream`.
    pub fn printable(&self) -> String {
        match self.kind {
            StepKind::Setup => format!("{},{}", SETUP, self.api.printable_name()),
            StepKind::Act(a) => format!("{},{}", a.name(), self.api.printable_name()),
        }
    }

    /// Feature form: setup steps are marked so they never collide with a plain create.
    pub fn feature(&self) -> String {
        match self.kind {
            StepKind::Setup => format!("{}:{}({})", SETUP, Action::Create.flag(), self.api.upper_name()),
            StepKind::Act(a) => format!("{}({})", a.flag(), self.api.upper_name()),
        }
    }
}

/// Ordered list of steps. Every generated payload holds exactly one setup step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Payload(pub Vec<PayloadStep>);

impl Payload {
    pub fn new(steps: Vec<PayloadStep>) -> Self {
        Payload(steps)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> &[PayloadStep] {
        &self.0
    }

    pub fn setup_index(&self) -> Option<usize> {
        self.0.iter().position(PayloadStep::is_setup)
    }

    pub fn printable(&self) -> Vec<String> {
        self.0.iter().map(PayloadStep::printable).collect()
    }
}

impl fmt::Display for Payload {
    /// Canonical list form, e.g. `['SETUP,File', 'READ,File']`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<String> = self.printable().into_iter().map(|s| format!("'{}'", s)).collect();
        write!(f, "[{}]", items.join(", "))
    }
}
