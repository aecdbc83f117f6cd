//! Persistence seam for tracking and delivery records.
//!
//! The orchestration layer consumes the [`Store`] trait only; storage
//! mechanics live behind it. [`MemoryStore`] is the reference implementation
//! used by tests and single-process deployments. Store failures are tracking
//! failures: callers log and swallow them, delivery never depends on them.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::message::Message;

/// Persisted record of one (channel, endpoint) attempt within a broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLogEntry {
    /// Id of the message being broadcast.
    pub message_id: Uuid,
    /// Channel the attempt went out on.
    pub channel: String,
    /// Sub-endpoint attempted, if the channel has several.
    pub endpoint: Option<String>,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Observed latency for successful attempts.
    pub latency_ms: Option<u64>,
    /// Failure text for failed attempts.
    pub error: Option<String>,
    /// When the attempt was made.
    pub sent_at: DateTime<Utc>,
}

/// One receipt of a message on one channel. A message that arrives over
/// several channels accumulates several receipts; the earliest is the first
/// receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub message_id: Uuid,
    pub channel: String,
    pub endpoint: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Milliseconds after the first receipt; zero for the first receipt
    /// itself.
    pub latency_ms: u64,
}

/// Running statistics for one (channel, endpoint) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub channel: String,
    pub endpoint: Option<String>,
    pub total_sent: u64,
    pub total_success: u64,
    pub total_failed: u64,
    pub total_rate_limited: u64,
    /// Exact incremental mean over successful-send latencies.
    pub avg_latency_ms: f64,
    /// Number of latency samples folded into the mean.
    pub latency_samples: u64,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Outcome of the most recent sample.
    pub is_available: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_rate_limited_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceRecord {
    /// A fresh record with zeroed counters.
    pub fn new(channel: &str, endpoint: Option<&str>) -> Self {
        Self {
            channel: channel.to_string(),
            endpoint: endpoint.map(str::to_string),
            total_sent: 0,
            total_success: 0,
            total_failed: 0,
            total_rate_limited: 0,
            avg_latency_ms: 0.0,
            latency_samples: 0,
            min_latency_ms: None,
            max_latency_ms: None,
            consecutive_failures: 0,
            is_available: true,
            last_success_at: None,
            last_failure_at: None,
            last_rate_limited_at: None,
            last_updated: Utc::now(),
        }
    }
}

/// Learned and stated channel reliability for one (peer, channel) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub peer_locator: String,
    pub channel: String,
    /// Whether an acknowledgment has confirmed this channel works.
    pub is_working: bool,
    pub last_ack_at: Option<DateTime<Utc>>,
    /// Incremental mean over acknowledged round-trip latencies.
    pub avg_latency_ms: Option<f64>,
    /// Number of acknowledgments folded into the mean.
    pub ack_count: u64,
    /// Explicit rank stated by the peer; lower is preferred.
    pub preference_order: Option<u32>,
    /// The peer stated this channel cannot reach them.
    pub cannot_use: bool,
    /// Peer-specific endpoint overriding the channel default.
    pub custom_endpoint: Option<String>,
    /// Whether the peer has explicitly ranked this channel; explicit values
    /// win over learned ones.
    pub explicit: bool,
}

impl ChannelPreference {
    /// A fresh learned (non-explicit) entry.
    pub fn learned(peer_locator: &str, channel: &str) -> Self {
        Self {
            peer_locator: peer_locator.to_string(),
            channel: channel.to_string(),
            is_working: false,
            last_ack_at: None,
            avg_latency_ms: None,
            ack_count: 0,
            preference_order: None,
            cannot_use: false,
            custom_endpoint: None,
            explicit: false,
        }
    }
}

/// Persistence operations consumed by the orchestration layer.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a message, ignoring duplicates. Returns `true` when the id was
    /// new (idempotent re-delivery support).
    async fn insert_message(&self, message: &Message) -> Result<bool, StoreError>;

    /// Fetch a message by id.
    async fn get_message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Append one receipt for a message.
    async fn insert_receipt(&self, receipt: ReceiptRecord) -> Result<(), StoreError>;

    /// The receipt with the earliest `received_at` for a message, if any.
    async fn first_receipt(&self, message_id: Uuid) -> Result<Option<ReceiptRecord>, StoreError>;

    /// All receipts for a message, ordered by `received_at`.
    async fn receipts(&self, message_id: Uuid) -> Result<Vec<ReceiptRecord>, StoreError>;

    /// Append one send-log entry.
    async fn append_send_log(&self, entry: SendLogEntry) -> Result<(), StoreError>;

    /// Send-log entries with `sent_at` inside the trailing window ending now.
    async fn send_log_since(&self, window: Duration) -> Result<Vec<SendLogEntry>, StoreError>;

    /// Insert or replace the record for its (channel, endpoint) key.
    async fn upsert_performance(&self, record: PerformanceRecord) -> Result<(), StoreError>;

    /// All persisted performance records.
    async fn load_performance(&self) -> Result<Vec<PerformanceRecord>, StoreError>;

    /// Insert or replace the preference for its (peer, channel) key.
    async fn upsert_preference(&self, preference: ChannelPreference) -> Result<(), StoreError>;

    /// All preferences recorded for a peer.
    async fn preferences_for(&self, peer_locator: &str)
    -> Result<Vec<ChannelPreference>, StoreError>;
}
