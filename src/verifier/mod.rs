//! Resumable verification campaigns and their persisted results.

pub mod campaign;
pub mod history;
pub mod state;


pub use campaign::{strategy_for, RunOutcome, Verifier};
pub use history::{Histories, History};
pub use state::{CampaignPaths, CampaignState, CaseRecord, RunInfo};
