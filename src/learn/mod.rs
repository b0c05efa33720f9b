pub mod forest;
pub mod learner;
pub mod tree;

pub use forest::{ForestConfig, ModelError, RandomForest};
pub use learner::{Learner, LigandPrediction, TeachingRecord};
