pub mod fan_group;
pub mod netting;

pub use fan_group::{FanGroupCollapser, DEFAULT_MIN_GROUP_SIZE};
pub use netting::NettingReconciler;
