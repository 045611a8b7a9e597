//! Multi-resolution rollups of station spectra.

pub mod bucket;
pub mod grid;
pub mod rules;

pub use bucket::{BucketKey, RollupBucket, RollupTile, TileContribution};
pub use grid::FrequencyGrid;
pub use rules::{
    AggregationRule, ResolutionRule, RuleContext, RuleExecution, RuleInput, RuleOutcome, RuleSet,
};
