//! Merge engine: joins fetched datasets per mapping rule into dated collections.

pub mod engine;
pub mod join;
pub mod output;

pub use engine::{check_rules, DatasetUrls, MergeEngine};
pub use join::{aggregate_join, equality_join, mean, mean_of, EqualityIndex};
pub use output::{finalize, record_to_feature, truncate_to_day, MergeOutput};
