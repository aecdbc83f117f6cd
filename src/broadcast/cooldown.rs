//! Per-endpoint cooldown state machine.
//!
//! Each (channel, endpoint) key is either Available or in Cooldown. Expiry is
//! detected lazily at check time rather than with a per-entry timer; a single
//! low-frequency background task emits batched reminders so long cooldowns
//! stay visible without per-send notification spam.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::broadcast::rate_limit::FailureCategory;

/// Reporting snapshot of one active cooldown.
#[derive(Debug, Clone, Serialize)]
pub struct CooldownEntry {
    pub channel: String,
    pub endpoint: Option<String>,
    /// Wall-clock end of the cooldown window.
    pub until: DateTime<Utc>,
    pub remaining_ms: u64,
    pub reason: String,
    pub category: String,
}

/// State returned for a key currently in cooldown.
#[derive(Debug, Clone)]
pub struct ActiveCooldown {
    pub remaining: Duration,
    pub reason: String,
    pub category: FailureCategory,
}

/// Notifications emitted by the registry.
#[derive(Debug, Clone)]
pub enum CooldownEvent {
    /// A key entered (or re-entered) cooldown.
    Paused {
        channel: String,
        endpoint: Option<String>,
        duration: Duration,
        reason: String,
    },
    /// A key left cooldown (detected lazily on check).
    Resumed {
        channel: String,
        endpoint: Option<String>,
    },
    /// Periodic batch of cooldowns still active and not recently notified.
    Reminder { entries: Vec<CooldownEntry> },
}

struct CooldownState {
    until: Instant,
    reason: String,
    category: FailureCategory,
    last_notified: Instant,
}

type Key = (String, Option<String>);

/// Process-wide cooldown registry, injected into the broadcaster at
/// construction.
pub struct CooldownRegistry {
    entries: RwLock<HashMap<Key, CooldownState>>,
    subscribers: RwLock<Vec<mpsc::UnboundedSender<CooldownEvent>>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to pause/resume/reminder events.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<CooldownEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }

    async fn emit(&self, event: CooldownEvent) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Enter or overwrite cooldown for a key and notify immediately.
    pub async fn set_cooldown(
        &self,
        channel: &str,
        endpoint: Option<&str>,
        duration: Duration,
        reason: &str,
        category: FailureCategory,
    ) {
        let key = (channel.to_string(), endpoint.map(str::to_string));
        let now = Instant::now();
        self.entries.write().await.insert(
            key,
            CooldownState {
                until: now + duration,
                reason: reason.to_string(),
                category,
                last_notified: now,
            },
        );

        tracing::info!(
            channel,
            endpoint = endpoint.unwrap_or("-"),
            duration_ms = duration.as_millis() as u64,
            reason,
            category = %category,
            "Channel endpoint paused"
        );
        self.emit(CooldownEvent::Paused {
            channel: channel.to_string(),
            endpoint: endpoint.map(str::to_string),
            duration,
            reason: reason.to_string(),
        })
        .await;
    }

    /// Check one key. An expired entry is removed here (lazy expiry) and a
    /// Resumed event is emitted; `None` means the key is available.
    pub async fn check_cooldown(
        &self,
        channel: &str,
        endpoint: Option<&str>,
    ) -> Option<ActiveCooldown> {
        let key = (channel.to_string(), endpoint.map(str::to_string));
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                None => return None,
                Some(state) if now < state.until => {
                    return Some(ActiveCooldown {
                        remaining: state.until - now,
                        reason: state.reason.clone(),
                        category: state.category,
                    });
                }
                Some(_) => true,
            }
        };

        if expired {
            self.entries.write().await.remove(&key);
            tracing::info!(
                channel,
                endpoint = endpoint.unwrap_or("-"),
                "Channel endpoint resumed"
            );
            self.emit(CooldownEvent::Resumed {
                channel: channel.to_string(),
                endpoint: endpoint.map(str::to_string),
            })
            .await;
        }
        None
    }

    /// The subset of `candidates` not currently in cooldown for `channel`.
    pub async fn filter_available(
        &self,
        channel: &str,
        candidates: Vec<Option<String>>,
    ) -> Vec<Option<String>> {
        let mut available = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self
                .check_cooldown(channel, candidate.as_deref())
                .await
                .is_none()
            {
                available.push(candidate);
            }
        }
        available
    }

    /// Snapshot of all active cooldowns; expired entries are pruned first.
    pub async fn active(&self) -> Vec<CooldownEntry> {
        let now = Instant::now();
        let expired: Vec<Key> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, s)| now >= s.until)
                .map(|(k, _)| k.clone())
                .collect()
        };
        for (channel, endpoint) in expired {
            // Re-check to emit the Resumed event through one code path.
            self.check_cooldown(&channel, endpoint.as_deref()).await;
        }

        let entries = self.entries.read().await;
        let mut snapshot: Vec<CooldownEntry> = entries
            .iter()
            .map(|((channel, endpoint), state)| {
                let remaining = state.until.saturating_duration_since(now);
                CooldownEntry {
                    channel: channel.clone(),
                    endpoint: endpoint.clone(),
                    until: Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default(),
                    remaining_ms: remaining.as_millis() as u64,
                    reason: state.reason.clone(),
                    category: state.category.as_str().to_string(),
                }
            })
            .collect();
        snapshot.sort_by(|a, b| (&a.channel, &a.endpoint).cmp(&(&b.channel, &b.endpoint)));
        snapshot
    }

    /// Emit one batched reminder for entries not notified within `interval`.
    /// A no-op when nothing qualifies. Called by the background task.
    pub async fn remind_stale(&self, interval: Duration) {
        let now = Instant::now();
        let due: Vec<CooldownEntry> = {
            let mut entries = self.entries.write().await;
            entries
                .iter_mut()
                .filter(|(_, s)| now < s.until && now.duration_since(s.last_notified) >= interval)
                .map(|((channel, endpoint), state)| {
                    state.last_notified = now;
                    let remaining = state.until - now;
                    CooldownEntry {
                        channel: channel.clone(),
                        endpoint: endpoint.clone(),
                        until: Utc::now()
                            + chrono::Duration::from_std(remaining).unwrap_or_default(),
                        remaining_ms: remaining.as_millis() as u64,
                        reason: state.reason.clone(),
                        category: state.category.as_str().to_string(),
                    }
                })
                .collect()
        };

        if due.is_empty() {
            return;
        }
        tracing::debug!(count = due.len(), "Cooldown reminder");
        self.emit(CooldownEvent::Reminder { entries: due }).await;
    }

    /// Spawn the periodic reminder loop. The returned handle must be stopped
    /// on shutdown.
    pub fn spawn_reminder_task(self: &Arc<Self>, interval: Duration) -> ReminderHandle {
        let registry = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let shutdown_rx = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; consume it so reminders
            // start one full interval after spawn.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.remind_stale(interval).await,
                    _ = shutdown_rx.notified() => break,
                }
            }
        });

        ReminderHandle { shutdown, handle }
    }
}

impl Default for CooldownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for the background reminder loop.
pub struct ReminderHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl ReminderHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Lifecycle: set, check with decreasing remaining, lazy expiry ──

    #[tokio::test]
    async fn test_cooldown_lifecycle() {
        let registry = CooldownRegistry::new();
        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_millis(1000),
                "test",
                FailureCategory::ChannelThrottle,
            )
            .await;

        let first = registry.check_cooldown("relay", None).await.unwrap();
        assert!(first.remaining <= Duration::from_millis(1000));
        assert_eq!(first.reason, "test");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = registry.check_cooldown("relay", None).await.unwrap();
        assert!(second.remaining < first.remaining);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(registry.check_cooldown("relay", None).await.is_none());
        // Entry is gone, not merely reported available.
        assert!(registry.active().await.is_empty());
    }

    #[tokio::test]
    async fn test_paused_and_resumed_events() {
        let registry = CooldownRegistry::new();
        let mut events = registry.subscribe().await;

        registry
            .set_cooldown(
                "relay",
                Some("wss://a"),
                Duration::from_millis(10),
                "flood",
                FailureCategory::ChannelThrottle,
            )
            .await;

        match events.recv().await.unwrap() {
            CooldownEvent::Paused {
                channel,
                endpoint,
                reason,
                ..
            } => {
                assert_eq!(channel, "relay");
                assert_eq!(endpoint.as_deref(), Some("wss://a"));
                assert_eq!(reason, "flood");
            }
            other => panic!("Expected Paused, got {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(
            registry
                .check_cooldown("relay", Some("wss://a"))
                .await
                .is_none()
        );

        match events.recv().await.unwrap() {
            CooldownEvent::Resumed { channel, endpoint } => {
                assert_eq!(channel, "relay");
                assert_eq!(endpoint.as_deref(), Some("wss://a"));
            }
            other => panic!("Expected Resumed, got {:?}", other),
        }
    }

    // ── Endpoint keys are independent ──

    #[tokio::test]
    async fn test_endpoints_cool_down_independently() {
        let registry = CooldownRegistry::new();
        registry
            .set_cooldown(
                "relay",
                Some("wss://a"),
                Duration::from_secs(60),
                "throttle",
                FailureCategory::ChannelThrottle,
            )
            .await;

        assert!(
            registry
                .check_cooldown("relay", Some("wss://a"))
                .await
                .is_some()
        );
        assert!(
            registry
                .check_cooldown("relay", Some("wss://b"))
                .await
                .is_none()
        );
        assert!(registry.check_cooldown("relay", None).await.is_none());
    }

    #[tokio::test]
    async fn test_filter_available() {
        let registry = CooldownRegistry::new();
        registry
            .set_cooldown(
                "relay",
                Some("wss://b"),
                Duration::from_secs(60),
                "refused",
                FailureCategory::ConnectionRefused,
            )
            .await;

        let candidates = vec![
            Some("wss://a".to_string()),
            Some("wss://b".to_string()),
            Some("wss://c".to_string()),
        ];
        let available = registry.filter_available("relay", candidates).await;
        assert_eq!(
            available,
            vec![Some("wss://a".to_string()), Some("wss://c".to_string())]
        );
    }

    // ── Overwrite extends the window ──

    #[tokio::test]
    async fn test_set_cooldown_overwrites() {
        let registry = CooldownRegistry::new();
        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_millis(10),
                "first",
                FailureCategory::ChannelThrottle,
            )
            .await;
        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_secs(60),
                "second",
                FailureCategory::ConnectionRefused,
            )
            .await;

        let active = registry.check_cooldown("relay", None).await.unwrap();
        assert_eq!(active.reason, "second");
        assert!(active.remaining > Duration::from_secs(30));
    }

    // ── active() snapshot ──

    #[tokio::test]
    async fn test_active_snapshot_sorted_and_pruned() {
        let registry = CooldownRegistry::new();
        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_secs(60),
                "throttle",
                FailureCategory::ChannelThrottle,
            )
            .await;
        registry
            .set_cooldown(
                "mesh",
                None,
                Duration::from_millis(5),
                "gone",
                FailureCategory::NetworkError,
            )
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let active = registry.active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].channel, "relay");
        assert_eq!(active[0].category, "channel_throttle");
        assert!(active[0].remaining_ms > 0);
    }

    // ── Reminders ──

    #[tokio::test]
    async fn test_remind_stale_batches_and_marks() {
        let registry = CooldownRegistry::new();
        let mut events = registry.subscribe().await;

        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_secs(60),
                "throttle",
                FailureCategory::ChannelThrottle,
            )
            .await;
        registry
            .set_cooldown(
                "mesh",
                None,
                Duration::from_secs(60),
                "refused",
                FailureCategory::ConnectionRefused,
            )
            .await;
        // Drain the two Paused events.
        events.recv().await.unwrap();
        events.recv().await.unwrap();

        // Entries were just notified (at set time); nothing is stale yet.
        registry.remind_stale(Duration::from_secs(300)).await;
        assert!(events.try_recv().is_err());

        // With a zero interval everything is stale; one batched event.
        registry.remind_stale(Duration::ZERO).await;
        match events.recv().await.unwrap() {
            CooldownEvent::Reminder { entries } => assert_eq!(entries.len(), 2),
            other => panic!("Expected Reminder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reminder_noop_when_idle() {
        let registry = CooldownRegistry::new();
        let mut events = registry.subscribe().await;
        registry.remind_stale(Duration::ZERO).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reminder_task_stops() {
        let registry = Arc::new(CooldownRegistry::new());
        let handle = registry.spawn_reminder_task(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Must return promptly rather than hang.
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("reminder task should stop");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let registry = CooldownRegistry::new();
        let events = registry.subscribe().await;
        drop(events);

        // Emitting with a dead subscriber must not error or leak.
        registry
            .set_cooldown(
                "relay",
                None,
                Duration::from_secs(1),
                "x",
                FailureCategory::NetworkError,
            )
            .await;
        assert!(registry.subscribers.read().await.is_empty());
    }
}
