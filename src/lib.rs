//! Multi-transport message delivery.
//!
//! crosswire delivers a logical message by fanning it out concurrently over
//! several independent, loosely-reliable transport channels; delivery counts
//! as successful when any one channel succeeds. Around that core sit a
//! rate-limit detector with per-endpoint cooldowns, running performance
//! tracking, and a receive side that deduplicates cross-channel arrivals and
//! answers each unique message with exactly one acknowledgment.
//!
//! The crate owns orchestration only. Concrete transports implement
//! [`channels::Channel`]; persistence implements [`store::Store`]
//! (an in-memory reference store ships with the crate).

pub mod broadcast;
pub mod channels;
pub mod config;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod message;
pub mod store;

pub use broadcast::{
    Broadcaster, CooldownEntry, CooldownEvent, CooldownRegistry, PerformanceTracker,
    RateLimitDetector,
};
pub use channels::{Channel, ChannelResult, ChannelStatusTracker, InboundEnvelope, any_success};
pub use config::Config;
pub use delivery::{Deliverer, Delivery, PreferenceLearner};
pub use error::{ChannelError, Error, LocatorError, Result, StoreError};
pub use identity::{Identity, Locator};
pub use message::{Message, MessageKind, StatedPreference};
pub use store::{MemoryStore, Store};

/// Initialize tracing from `RUST_LOG`, once. Convenience for binaries and
/// examples; a no-op if a subscriber is already installed.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
