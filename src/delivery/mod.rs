//! Receive-side delivery: deduplication, acknowledgments, and preference
//! learning.

mod deliverer;
mod preferences;
mod self_filter;

pub use deliverer::{Deliverer, Delivery};
pub use preferences::PreferenceLearner;
pub use self_filter::SelfMessageFilter;
