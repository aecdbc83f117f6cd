//! Send-side orchestration: concurrent fan-out, rate-limit classification,
//! cooldown state, and performance tracking.

mod broadcaster;
mod cooldown;
mod rate_limit;
mod tracker;

pub use broadcaster::Broadcaster;
pub use cooldown::{
    ActiveCooldown, CooldownEntry, CooldownEvent, CooldownRegistry, ReminderHandle,
};
pub use rate_limit::{Classification, FailureCategory, RateLimitDetector};
pub use tracker::{PerformanceTracker, SendSample};
