//! Self-message bypass for inbound traffic.
//!
//! A channel may echo our own broadcast back as an inbound message. This
//! filter recognizes payloads whose sender locator is one of our own
//! identities and drops them before deduplication, so an echo can never turn
//! into a self-acknowledgment loop.

use std::collections::HashSet;

use tokio::sync::RwLock;

/// Tracks the node's own locators for echo detection.
pub struct SelfMessageFilter {
    self_locators: RwLock<HashSet<String>>,
    enabled: bool,
}

impl SelfMessageFilter {
    pub fn new(enabled: bool) -> Self {
        Self {
            self_locators: RwLock::new(HashSet::new()),
            enabled,
        }
    }

    /// Register one of our own locators.
    pub async fn register(&self, locator: &str) {
        self.self_locators.write().await.insert(locator.to_string());
        tracing::debug!(locator, "Registered self locator");
    }

    /// Remove a previously registered locator.
    pub async fn unregister(&self, locator: &str) {
        self.self_locators.write().await.remove(locator);
    }

    /// Whether an inbound sender locator is our own. Always `false` when the
    /// filter is disabled.
    pub async fn is_self(&self, sender_locator: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.self_locators.read().await.contains(sender_locator)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for SelfMessageFilter {
    fn default() -> Self {
        Self::new(true)
    }
}
