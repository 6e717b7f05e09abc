pub mod data;
pub mod rules;

pub use data::*;
pub use rules::{
    AnchorKind, AnchorSet, ClassifierRules, KtpRules, LabelAlias, Replacement, ScoringRules,
    SimRules, ValueVocabulary,
};
