pub mod config;
pub mod crossval;
pub mod worker;

pub use config::{CampaignConfig, Stage};
pub use crossval::{LooOutcome, leave_one_ligand_out, write_loo_csv};
pub use worker::Campaign;
