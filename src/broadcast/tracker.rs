//! Per-endpoint send performance tracking.
//!
//! One [`PerformanceRecord`] per (channel, endpoint) pair, updated after
//! every send attempt from either direction of the system. Updates to a key
//! are serialized behind the tracker's write lock so counters and the
//! incremental mean stay correct under concurrent completions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{PerformanceRecord, Store};

/// One observed send outcome.
#[derive(Debug, Clone, Copy)]
pub struct SendSample {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub is_rate_limited: bool,
}

impl SendSample {
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            is_rate_limited: false,
        }
    }

    pub fn failed(is_rate_limited: bool) -> Self {
        Self {
            success: false,
            latency_ms: None,
            is_rate_limited,
        }
    }
}

type Key = (String, Option<String>);

/// Process-wide performance tracker, injected at construction.
pub struct PerformanceTracker {
    records: RwLock<HashMap<Key, PerformanceRecord>>,
    /// Optional write-through target; failures are logged and swallowed so
    /// tracking-store health never affects delivery.
    store: Option<Arc<dyn Store>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Track with write-through persistence of each updated record.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Fold one sample into the record for (channel, endpoint).
    pub async fn update(&self, channel: &str, endpoint: Option<&str>, sample: SendSample) {
        let key = (channel.to_string(), endpoint.map(str::to_string));
        let updated = {
            let mut records = self.records.write().await;
            let record = records
                .entry(key)
                .or_insert_with(|| PerformanceRecord::new(channel, endpoint));
            let now = Utc::now();

            record.total_sent += 1;
            record.is_available = sample.success;
            record.last_updated = now;

            if sample.success {
                record.total_success += 1;
                record.consecutive_failures = 0;
                record.last_success_at = Some(now);

                if let Some(latency) = sample.latency_ms {
                    record.latency_samples += 1;
                    // Exact running mean, not the (old+new)/2 shortcut.
                    record.avg_latency_ms +=
                        (latency as f64 - record.avg_latency_ms) / record.latency_samples as f64;
                    record.min_latency_ms =
                        Some(record.min_latency_ms.map_or(latency, |m| m.min(latency)));
                    record.max_latency_ms =
                        Some(record.max_latency_ms.map_or(latency, |m| m.max(latency)));
                }
            } else {
                record.total_failed += 1;
                record.consecutive_failures += 1;
                record.last_failure_at = Some(now);
                if sample.is_rate_limited {
                    record.total_rate_limited += 1;
                    record.last_rate_limited_at = Some(now);
                }
            }

            record.clone()
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_performance(updated).await {
                tracing::warn!(channel, error = %e, "Failed to persist performance record");
            }
        }
    }

    /// Records filtered by channel and/or endpoint, most recently updated
    /// first.
    pub async fn metrics(
        &self,
        channel: Option<&str>,
        endpoint: Option<&str>,
    ) -> Vec<PerformanceRecord> {
        let records = self.records.read().await;
        let mut selected: Vec<PerformanceRecord> = records
            .values()
            .filter(|r| channel.is_none_or(|c| r.channel == c))
            .filter(|r| endpoint.is_none_or(|e| r.endpoint.as_deref() == Some(e)))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        selected
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}
