//! Per-peer channel preference learning.
//!
//! Every acknowledgment received from a peer is evidence that some channel
//! reaches them. Learned statistics rank channels by observed reliability;
//! explicit preferences a peer states inside an acknowledgment always win
//! over learned values, and learned data only fills channels the peer has
//! not explicitly ranked.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::message::StatedPreference;
use crate::store::{ChannelPreference, Store};

type Key = (String, String);

/// Learns and ranks per-peer channel reliability.
pub struct PreferenceLearner {
    entries: RwLock<HashMap<Key, ChannelPreference>>,
    /// Statements about our own channels, shared with peers inside every
    /// acknowledgment we send.
    local_statements: RwLock<Vec<StatedPreference>>,
    store: Option<Arc<dyn Store>>,
}

impl PreferenceLearner {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            local_statements: RwLock::new(Vec::new()),
            store: None,
        }
    }

    /// Learn with write-through persistence of each updated preference.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            local_statements: RwLock::new(Vec::new()),
            store: Some(store),
        }
    }

    /// Record one acknowledgment from `peer` confirming `channel` works.
    pub async fn record_ack(&self, peer: &str, channel: &str, latency_ms: Option<u64>) {
        let updated = {
            let mut entries = self.entries.write().await;
            let entry = entries
                .entry((peer.to_string(), channel.to_string()))
                .or_insert_with(|| ChannelPreference::learned(peer, channel));

            entry.is_working = true;
            entry.last_ack_at = Some(Utc::now());
            if let Some(latency) = latency_ms {
                entry.ack_count += 1;
                let prev = entry.avg_latency_ms.unwrap_or(0.0);
                entry.avg_latency_ms =
                    Some(prev + (latency as f64 - prev) / entry.ack_count as f64);
            }
            entry.clone()
        };

        tracing::debug!(
            peer,
            channel,
            latency_ms,
            "Acknowledgment folded into channel preferences"
        );
        self.persist(updated).await;
    }

    /// Apply explicit preferences a peer stated about its own channels.
    /// Stated rank/usability always overwrite learned values.
    pub async fn apply_stated(&self, peer: &str, stated: &[StatedPreference]) {
        for statement in stated {
            let updated = {
                let mut entries = self.entries.write().await;
                let entry = entries
                    .entry((peer.to_string(), statement.channel_name.clone()))
                    .or_insert_with(|| ChannelPreference::learned(peer, &statement.channel_name));

                entry.explicit = true;
                entry.preference_order = statement.preference_order;
                entry.cannot_use = statement.cannot_use;
                entry.custom_endpoint = statement.custom_endpoint.clone();
                entry.clone()
            };
            self.persist(updated).await;
        }
    }

    /// Usable channels for a peer, best first: explicitly ranked channels by
    /// stated order, then learned channels by average latency. `cannot_use`
    /// channels are excluded.
    pub async fn ranked(&self, peer: &str) -> Vec<ChannelPreference> {
        let entries = self.entries.read().await;
        let mut prefs: Vec<ChannelPreference> = entries
            .values()
            .filter(|p| p.peer_locator == peer && !p.cannot_use)
            .cloned()
            .collect();

        prefs.sort_by(|a, b| {
            match (
                a.explicit.then(|| a.preference_order).flatten(),
                b.explicit.then(|| b.preference_order).flatten(),
            ) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => {
                    let ax = a.avg_latency_ms.unwrap_or(f64::MAX);
                    let bx = b.avg_latency_ms.unwrap_or(f64::MAX);
                    ax.partial_cmp(&bx)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.channel.cmp(&b.channel))
                }
            }
        });
        prefs
    }

    /// Everything known about a peer, including unusable channels.
    pub async fn all_for(&self, peer: &str) -> Vec<ChannelPreference> {
        let entries = self.entries.read().await;
        let mut prefs: Vec<ChannelPreference> = entries
            .values()
            .filter(|p| p.peer_locator == peer)
            .cloned()
            .collect();
        prefs.sort_by(|a, b| a.channel.cmp(&b.channel));
        prefs
    }

    /// Replace the statements we share about our own channels.
    pub async fn set_local_statements(&self, statements: Vec<StatedPreference>) {
        *self.local_statements.write().await = statements;
    }

    /// The statements embedded into each outbound acknowledgment.
    pub async fn local_statements(&self) -> Vec<StatedPreference> {
        self.local_statements.read().await.clone()
    }

    async fn persist(&self, preference: ChannelPreference) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert_preference(preference).await {
                tracing::warn!(error = %e, "Failed to persist channel preference");
            }
        }
    }
}

impl Default for PreferenceLearner {
    fn default() -> Self {
        Self::new()
    }
}
