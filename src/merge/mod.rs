pub mod alert_leg;
pub mod scheduler;
pub mod window;

pub use alert_leg::{AlertLeg, MergeLeg, MergedAlert};
pub use scheduler::run_merge_drain;
pub use window::{BucketState, MergeBucket, MergeEmission, MergeWindow};
