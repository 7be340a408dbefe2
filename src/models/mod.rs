//! Data models shared by the dataset store, the estimator and the HTTP layer.
//!
//! Wire names are camelCase to match the mobile client.

mod correction;
mod dataset;
mod estimate;
mod report;

pub use correction::*;
pub use dataset::*;
pub use estimate::*;
pub use report::*;
