//! Concurrent fan-out broadcaster.
//!
//! One `broadcast()` call dispatches a payload over every enabled (channel,
//! endpoint) pair that is not cooling down, awaits all of them, and folds the
//! outcomes into the rate-limit, cooldown, performance, and send-log state.
//! A channel failure is data in the result list, never an abort; only an
//! invalid recipient locator fails the call itself.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future;
use uuid::Uuid;

use crate::channels::{Channel, ChannelResult};
use crate::config::Config;
use crate::error::Result;
use crate::identity::Locator;
use crate::message::Message;
use crate::store::{SendLogEntry, Store};

use super::cooldown::CooldownRegistry;
use super::rate_limit::RateLimitDetector;
use super::tracker::{PerformanceTracker, SendSample};

/// The fan-out orchestrator. Cooldown and performance state are injected,
/// owned objects; tracking wraps the send primitive by composition.
pub struct Broadcaster {
    channels: Vec<Arc<dyn Channel>>,
    cooldowns: Arc<CooldownRegistry>,
    detector: RateLimitDetector,
    tracker: Arc<PerformanceTracker>,
    store: Arc<dyn Store>,
    config: Config,
}

impl Broadcaster {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        cooldowns: Arc<CooldownRegistry>,
        tracker: Arc<PerformanceTracker>,
        detector: RateLimitDetector,
    ) -> Self {
        Self {
            channels: Vec::new(),
            cooldowns,
            detector,
            tracker,
            store,
            config,
        }
    }

    /// Add a channel to the enabled set. Capability and configuration checks
    /// happen once, here; the dispatch path never special-cases a channel.
    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name();
        if !channel.is_supported() {
            tracing::info!(channel = name, "Channel not supported here, skipping");
            return;
        }
        if self.config.is_disabled(name) {
            tracing::info!(channel = name, "Channel disabled by configuration, skipping");
            return;
        }
        self.channels.push(channel);
    }

    /// The enabled channels, in registration order.
    pub fn channels(&self) -> &[Arc<dyn Channel>] {
        &self.channels
    }

    /// Shared cooldown registry (the `getActiveCooldowns` surface).
    pub fn cooldowns(&self) -> &Arc<CooldownRegistry> {
        &self.cooldowns
    }

    /// Shared performance tracker (the metrics surface).
    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    /// Broadcast an opaque payload. Send-log entries are keyed under a fresh
    /// broadcast id.
    pub async fn broadcast(&self, recipient: &str, payload: &str) -> Result<Vec<ChannelResult>> {
        self.dispatch(recipient, payload, Uuid::new_v4()).await
    }

    /// Broadcast a wire message, logging under the message's own id.
    pub async fn send_message(
        &self,
        recipient: &str,
        message: &Message,
    ) -> Result<Vec<ChannelResult>> {
        let payload = message
            .to_wire()
            .map_err(|e| crate::error::ChannelError::InvalidMessage(e.to_string()))?;
        self.dispatch(recipient, &payload, message.id).await
    }

    async fn dispatch(
        &self,
        recipient: &str,
        payload: &str,
        message_id: Uuid,
    ) -> Result<Vec<ChannelResult>> {
        // Fail fast on a bad locator, before any channel is touched.
        let locator = Locator::decode(recipient)?;

        let plan = self.plan_dispatches().await;
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let sends = plan.iter().map(|(channel, endpoint)| {
            self.timed_send(channel.as_ref(), &locator, payload, endpoint.as_deref())
        });
        let results = future::join_all(sends).await;

        for result in &results {
            self.track(result).await;
            self.log_send(message_id, result).await;
        }

        tracing::debug!(
            recipient = %locator.short(),
            attempted = results.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            "Broadcast settled"
        );
        Ok(results)
    }

    /// Expand channels into (channel, endpoint) dispatches, dropping pairs in
    /// cooldown. A channel with every endpoint cooling down is skipped
    /// entirely; that is informational, not an error.
    async fn plan_dispatches(&self) -> Vec<(Arc<dyn Channel>, Option<String>)> {
        let mut plan = Vec::new();
        for channel in &self.channels {
            let endpoints = channel.endpoints();
            let candidates: Vec<Option<String>> = if endpoints.is_empty() {
                vec![None]
            } else {
                endpoints.into_iter().map(Some).collect()
            };
            let total = candidates.len();

            let available = self
                .cooldowns
                .filter_available(channel.name(), candidates)
                .await;
            if available.is_empty() {
                tracing::info!(
                    channel = channel.name(),
                    "Channel skipped: all endpoints cooling down"
                );
                continue;
            }
            if available.len() < total {
                tracing::debug!(
                    channel = channel.name(),
                    available = available.len(),
                    total,
                    "Some endpoints cooling down"
                );
            }
            for endpoint in available {
                plan.push((Arc::clone(channel), endpoint));
            }
        }
        plan
    }

    async fn timed_send(
        &self,
        channel: &dyn Channel,
        recipient: &Locator,
        payload: &str,
        endpoint: Option<&str>,
    ) -> ChannelResult {
        let name = channel.name().to_string();
        let started = Instant::now();
        let send = channel.send(recipient, payload, endpoint);

        match tokio::time::timeout(self.config.send_timeout, send).await {
            Ok(Ok(())) => {
                ChannelResult::ok(&name, endpoint, started.elapsed().as_millis() as u64)
            }
            Ok(Err(e)) => ChannelResult::failed(&name, endpoint, e.reason()),
            Err(_) => ChannelResult::failed(
                &name,
                endpoint,
                format!("send timed out after {:?}", self.config.send_timeout),
            ),
        }
    }

    /// Feed one result through classification, cooldown, and the tracker.
    async fn track(&self, result: &ChannelResult) {
        if result.success {
            self.tracker
                .update(
                    &result.channel,
                    result.endpoint.as_deref(),
                    SendSample::ok(result.latency_ms.unwrap_or(0)),
                )
                .await;
            return;
        }

        let error = result.error.as_deref().unwrap_or("");
        let classification = self.detector.classify(error, &result.channel);
        if let Some(c) = classification {
            tracing::warn!(
                channel = result.channel,
                endpoint = result.endpoint.as_deref().unwrap_or("-"),
                category = %c.category,
                error,
                "Send failed, cooling endpoint down"
            );
            self.cooldowns
                .set_cooldown(
                    &result.channel,
                    result.endpoint.as_deref(),
                    c.cooldown,
                    error,
                    c.category,
                )
                .await;
        } else {
            tracing::debug!(
                channel = result.channel,
                endpoint = result.endpoint.as_deref().unwrap_or("-"),
                error,
                "Send failed"
            );
        }

        self.tracker
            .update(
                &result.channel,
                result.endpoint.as_deref(),
                SendSample::failed(classification.is_some_and(|c| c.is_rate_limited)),
            )
            .await;
    }

    async fn log_send(&self, message_id: Uuid, result: &ChannelResult) {
        let entry = SendLogEntry {
            message_id,
            channel: result.channel.clone(),
            endpoint: result.endpoint.clone(),
            success: result.success,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
            sent_at: Utc::now(),
        };
        if let Err(e) = self.store.append_send_log(entry).await {
            tracing::warn!(channel = result.channel, error = %e, "Failed to persist send log");
        }
    }
}
