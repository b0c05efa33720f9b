//! Data layer: CSV inputs of the campaign.
//!
//! ```text
//!  inventory.csv          descriptors.csv        reactions.csv
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//!   ┌───────────┐        ┌─────────────┐        ┌───────────┐
//!   │ inventory │ ──────▶│ descriptors │        │ reactions │
//!   └───────────┘ Ligands└─────────────┘        └───────────┘
//!                               │ feature rows        │ ReactionSet
//!                               ▼                     ▼
//!                        model input (learn)   training rows (learn)
//! ```

pub mod descriptors;
pub mod inventory;
pub mod reactions;

pub use descriptors::{AMOUNT_FEATURE, DescriptorTable, FeatureMatrix, feature_matrix};
pub use inventory::{load_inventory, write_inventory, write_smi};
pub use reactions::{load_reaction_set, load_reactions, save_reaction_set};
