pub mod ligand;
pub mod reaction;

pub use ligand::{Ligand, PropertyValue, ligand_by_inchi, ligand_by_label, ligand_by_name};
pub use reaction::{
    Condition, LigandSolution, Reaction, ReactionKind, ReactionSet, StockSolution, TrainingRow,
};
