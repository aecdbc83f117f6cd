//! Multi-channel transport system.
//!
//! Channels are independent message-transport backends. The broadcaster fans
//! one logical message out across all of them; the deliverer drains their
//! subscriptions back into a single deduplicated stream.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          Broadcaster                               │
//! │                                                                    │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐           │
//! │   │ relay chan   │   │ mesh chan    │   │ ...          │           │
//! │   │ (N endpoints)│   │              │   │              │           │
//! │   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘           │
//! │          │                  │                  │                   │
//! │          └──────────────────┴──────────────────┘                   │
//! │                       join_all (futures)                           │
//! │                             │                                      │
//! │                             ▼                                      │
//! │                     Vec<ChannelResult>                             │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

mod status;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use status::{ChannelStatus, ChannelStatusInfo, ChannelStatusTracker};

use crate::error::ChannelError;
use crate::identity::Locator;

/// A message handed up from a channel subscription.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Channel the payload arrived on.
    pub channel: String,
    /// Sub-endpoint it arrived through, if known.
    pub endpoint: Option<String>,
    /// Raw wire payload.
    pub payload: String,
}

/// One independent message-transport backend.
///
/// Implementations bound their own I/O with a timeout; the broadcaster adds a
/// deadline on top so an adapter that never settles cannot stall a broadcast.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable channel name used in results, cooldown keys, and metrics.
    fn name(&self) -> &str;

    /// Whether this channel can run in the current environment. Consulted
    /// once at startup to build the enabled set.
    fn is_supported(&self) -> bool {
        true
    }

    /// Reachable sub-endpoints. An empty list means the channel has a single
    /// implicit endpoint.
    fn endpoints(&self) -> Vec<String> {
        Vec::new()
    }

    /// Send a payload to the recipient through one endpoint (`None` for the
    /// implicit endpoint).
    async fn send(
        &self,
        recipient: &Locator,
        payload: &str,
        endpoint: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Begin delivering inbound payloads for `own` into `sink`. Resolves once
    /// the subscription is established; delivery continues in the background.
    async fn subscribe(
        &self,
        own: &Locator,
        sink: mpsc::Sender<InboundEnvelope>,
    ) -> Result<(), ChannelError>;
}

/// Outcome of one (channel, endpoint) attempt within a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    /// Channel attempted.
    pub channel: String,
    /// Sub-endpoint attempted, if the channel has several.
    pub endpoint: Option<String>,
    /// Whether the send succeeded.
    pub success: bool,
    /// Observed latency for successful sends.
    pub latency_ms: Option<u64>,
    /// Failure text for failed sends.
    pub error: Option<String>,
}

impl ChannelResult {
    /// A successful result with the observed latency.
    pub fn ok(channel: &str, endpoint: Option<&str>, latency_ms: u64) -> Self {
        Self {
            channel: channel.to_string(),
            endpoint: endpoint.map(str::to_string),
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    /// A failed result carrying the failure text.
    pub fn failed(channel: &str, endpoint: Option<&str>, error: String) -> Self {
        Self {
            channel: channel.to_string(),
            endpoint: endpoint.map(str::to_string),
            success: false,
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// Overall-success policy over a broadcast's results: delivery counts as
/// successful when at least one attempt succeeded.
pub fn any_success(results: &[ChannelResult]) -> bool {
    results.iter().any(|r| r.success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_success_empty() {
        assert!(!any_success(&[]));
    }

    #[test]
    fn test_any_success_mixed() {
        let results = vec![
            ChannelResult::failed("relay", None, "rate limit".to_string()),
            ChannelResult::ok("mesh", None, 200),
        ];
        assert!(any_success(&results));
    }

    #[test]
    fn test_any_success_all_failed() {
        let results = vec![
            ChannelResult::failed("relay", Some("wss://a"), "down".to_string()),
            ChannelResult::failed("relay", Some("wss://b"), "down".to_string()),
        ];
        assert!(!any_success(&results));
    }

    #[test]
    fn test_channel_result_serialization() {
        let result = ChannelResult::ok("relay", Some("wss://a"), 200);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["channel"], "relay");
        assert_eq!(json["endpoint"], "wss://a");
        assert_eq!(json["success"], true);
        assert_eq!(json["latency_ms"], 200);
        assert!(json["error"].is_null());
    }
}
