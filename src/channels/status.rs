//! Channel status tracking for monitoring connected transports.
//!
//! Tracks per-channel connection status, inbound message counts, and error
//! counts. Thread-safe via `RwLock` and atomics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

/// Status of a channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Error(String),
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Disconnected => write!(f, "disconnected"),
            ChannelStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Point-in-time status summary for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusInfo {
    pub name: String,
    pub status: String,
    pub connected_since: Option<String>,
    pub inbound_count: u64,
    pub last_inbound_at: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

struct ChannelHealth {
    status: RwLock<ChannelStatus>,
    connected_since: RwLock<Option<DateTime<Utc>>>,
    inbound_count: AtomicU64,
    last_inbound_at: RwLock<Option<DateTime<Utc>>>,
    error_count: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl ChannelHealth {
    fn new() -> Self {
        Self {
            status: RwLock::new(ChannelStatus::Disconnected),
            connected_since: RwLock::new(None),
            inbound_count: AtomicU64::new(0),
            last_inbound_at: RwLock::new(None),
            error_count: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    async fn info(&self, name: &str) -> ChannelStatusInfo {
        let status = self.status.read().await;
        let connected_since = self.connected_since.read().await;
        let last_inbound_at = self.last_inbound_at.read().await;
        let last_error = self.last_error.read().await;

        let status_str = match &*status {
            ChannelStatus::Connected => "connected".to_string(),
            ChannelStatus::Disconnected => "disconnected".to_string(),
            ChannelStatus::Error(_) => "error".to_string(),
        };

        ChannelStatusInfo {
            name: name.to_string(),
            status: status_str,
            connected_since: connected_since.map(|dt| dt.to_rfc3339()),
            inbound_count: self.inbound_count.load(Ordering::Relaxed),
            last_inbound_at: last_inbound_at.map(|dt| dt.to_rfc3339()),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error: last_error.clone(),
        }
    }
}

/// Tracks status and counters for all registered channels.
pub struct ChannelStatusTracker {
    channels: Arc<RwLock<HashMap<String, Arc<ChannelHealth>>>>,
    started_at: Instant,
}

impl ChannelStatusTracker {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }

    /// Register a channel. A no-op if it already exists.
    pub async fn register(&self, name: &str) {
        let mut channels = self.channels.write().await;
        channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ChannelHealth::new()));
    }

    /// Record an inbound message on the named channel. No-op if unregistered.
    pub async fn record_inbound(&self, name: &str) {
        let channels = self.channels.read().await;
        if let Some(health) = channels.get(name) {
            health.inbound_count.fetch_add(1, Ordering::Relaxed);
            let mut last = health.last_inbound_at.write().await;
            *last = Some(Utc::now());
        }
    }

    /// Record an error on the named channel. No-op if unregistered.
    pub async fn record_error(&self, name: &str, reason: &str) {
        let channels = self.channels.read().await;
        if let Some(health) = channels.get(name) {
            health.error_count.fetch_add(1, Ordering::Relaxed);
            let mut last = health.last_error.write().await;
            *last = Some(reason.to_string());
        }
    }

    /// Update the connection status of a channel.
    ///
    /// Transitioning to `Connected` sets `connected_since` if unset;
    /// transitioning away clears it. No-op if unregistered.
    pub async fn set_status(&self, name: &str, status: ChannelStatus) {
        let channels = self.channels.read().await;
        if let Some(health) = channels.get(name) {
            let is_connecting = status == ChannelStatus::Connected;
            {
                let mut s = health.status.write().await;
                *s = status;
            }
            let mut cs = health.connected_since.write().await;
            if is_connecting {
                if cs.is_none() {
                    *cs = Some(Utc::now());
                }
            } else {
                *cs = None;
            }
        }
    }

    /// Status of one channel by name.
    pub async fn status(&self, name: &str) -> Option<ChannelStatusInfo> {
        let channels = self.channels.read().await;
        let health = channels.get(name)?;
        Some(health.info(name).await)
    }

    /// Status of all registered channels, sorted by name.
    pub async fn all_statuses(&self) -> Vec<ChannelStatusInfo> {
        let channels = self.channels.read().await;
        let mut result = Vec::with_capacity(channels.len());
        for (name, health) in channels.iter() {
            result.push(health.info(name).await);
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Number of registered channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of channels currently connected.
    pub async fn connected_count(&self) -> usize {
        let channels = self.channels.read().await;
        let mut count = 0;
        for health in channels.values() {
            if *health.status.read().await == ChannelStatus::Connected {
                count += 1;
            }
        }
        count
    }

    /// Inbound messages per minute across all channels since startup.
    pub async fn inbound_throughput(&self) -> f64 {
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        if elapsed_secs < 1.0 {
            return 0.0;
        }
        let channels = self.channels.read().await;
        let total: u64 = channels
            .values()
            .map(|h| h.inbound_count.load(Ordering::Relaxed))
            .sum();
        (total as f64 / elapsed_secs) * 60.0
    }
}

impl Default for ChannelStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
