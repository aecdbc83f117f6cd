//! Inbound message delivery with cross-channel deduplication.
//!
//! The same logical message can arrive more than once, over different
//! channels, in any order. The deliverer keys everything on the message id:
//! the first receipt persists the message, notifies the application exactly
//! once, and (for non-acknowledgments) synthesizes an acknowledgment back to
//! the sender; every later receipt only records arrival for tracking.
//!
//! Two invariants close the reply-loop holes:
//! - an inbound acknowledgment never produces another acknowledgment;
//! - an echo of our own outbound traffic is dropped before deduplication.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};

use crate::broadcast::Broadcaster;
use crate::channels::{ChannelStatus, ChannelStatusTracker, InboundEnvelope, any_success};
use crate::error::{ChannelError, Error, Result};
use crate::identity::Locator;
use crate::message::Message;
use crate::store::{ReceiptRecord, Store};

use super::preferences::PreferenceLearner;
use super::self_filter::SelfMessageFilter;

/// Application callback invoked once per unique message id.
type MessageCallback = dyn Fn(Message, String) + Send + Sync;

/// Outcome of handling one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// First receipt; the application was notified.
    Delivered,
    /// Already known; only a receipt was recorded.
    Duplicate,
    /// Echo of our own outbound traffic; dropped.
    SelfEcho,
}

/// Receive-side coordinator over all enabled channels.
pub struct Deliverer {
    own: Locator,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    preferences: Arc<PreferenceLearner>,
    self_filter: SelfMessageFilter,
    status: Arc<ChannelStatusTracker>,
    callback: RwLock<Option<Arc<MessageCallback>>>,
}

impl Deliverer {
    pub fn new(
        own: Locator,
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
        preferences: Arc<PreferenceLearner>,
        status: Arc<ChannelStatusTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            own,
            store,
            broadcaster,
            preferences,
            self_filter: SelfMessageFilter::default(),
            status,
            callback: RwLock::new(None),
        })
    }

    /// Register the application callback. Fires exactly once per unique
    /// message id, from the receipt that arrived first.
    pub async fn on_message<F>(&self, callback: F)
    where
        F: Fn(Message, String) + Send + Sync + 'static,
    {
        *self.callback.write().await = Some(Arc::new(callback));
    }

    /// Subscribe on every enabled channel and drain inbound payloads in a
    /// background task until all channel senders hang up.
    pub async fn subscribe_all(self: &Arc<Self>) -> Result<()> {
        self.self_filter.register(self.own.as_str()).await;

        let (tx, mut rx) = mpsc::channel::<InboundEnvelope>(64);
        for channel in self.broadcaster.channels() {
            let name = channel.name().to_string();
            self.status.register(&name).await;
            channel.subscribe(&self.own, tx.clone()).await?;
            self.status
                .set_status(&name, ChannelStatus::Connected)
                .await;
        }
        drop(tx);

        let deliverer = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = deliverer
                    .handle_inbound(&envelope.channel, envelope.endpoint.as_deref(), &envelope.payload)
                    .await
                {
                    tracing::debug!(
                        channel = envelope.channel,
                        error = %e,
                        "Inbound payload not delivered"
                    );
                }
            }
        });
        Ok(())
    }

    /// Run one inbound payload through the delivery state machine.
    pub async fn handle_inbound(
        &self,
        channel: &str,
        endpoint: Option<&str>,
        payload: &str,
    ) -> Result<Delivery> {
        let message = match Message::from_wire(payload) {
            Ok(message) => message,
            Err(e) => {
                self.status
                    .record_error(channel, &format!("invalid payload: {e}"))
                    .await;
                return Err(Error::Channel(ChannelError::InvalidMessage(e.to_string())));
            }
        };

        if self.self_filter.is_self(&message.sender_locator).await {
            tracing::debug!(channel, id = %message.id, "Dropping echoed self message");
            return Ok(Delivery::SelfEcho);
        }

        self.status.record_inbound(channel).await;

        // Identity is established by the store; insert-or-ignore on the id
        // makes re-delivery across channels idempotent.
        let first_receipt = self
            .store
            .insert_message(&message)
            .await
            .map_err(Error::Store)?;

        if first_receipt {
            self.deliver_first(channel, endpoint, &message).await;
            Ok(Delivery::Delivered)
        } else {
            self.record_duplicate(channel, endpoint, &message).await;
            Ok(Delivery::Duplicate)
        }
    }

    async fn deliver_first(&self, channel: &str, endpoint: Option<&str>, message: &Message) {
        self.record_receipt(channel, endpoint, message, 0).await;

        let callback = self.callback.read().await.clone();
        if let Some(callback) = callback {
            callback(message.clone(), channel.to_string());
        }

        tracing::info!(
            id = %message.id,
            channel,
            kind = ?message.kind,
            "Message delivered"
        );

        // The kind check must come before ack synthesis, unconditionally:
        // acknowledging an acknowledgment would loop forever.
        if message.is_acknowledgment() {
            self.process_ack(channel, message).await;
        } else {
            self.acknowledge(channel, message).await;
        }
    }

    async fn record_duplicate(&self, channel: &str, endpoint: Option<&str>, message: &Message) {
        let latency_ms = match self.store.first_receipt(message.id).await {
            Ok(Some(first)) => (Utc::now() - first.received_at).num_milliseconds().max(0) as u64,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "Failed to load first receipt");
                0
            }
        };
        self.record_receipt(channel, endpoint, message, latency_ms)
            .await;
        tracing::debug!(id = %message.id, channel, latency_ms, "Duplicate receipt recorded");

        // Preference metadata is folded in on every receipt of an ack.
        if message.is_acknowledgment() {
            self.process_ack(channel, message).await;
        }
    }

    /// Tracking write; logged and swallowed so store health never blocks
    /// delivery.
    async fn record_receipt(
        &self,
        channel: &str,
        endpoint: Option<&str>,
        message: &Message,
        latency_ms: u64,
    ) {
        let receipt = ReceiptRecord {
            message_id: message.id,
            channel: channel.to_string(),
            endpoint: endpoint.map(str::to_string),
            received_at: Utc::now(),
            latency_ms,
        };
        if let Err(e) = self.store.insert_receipt(receipt).await {
            tracing::warn!(id = %message.id, error = %e, "Failed to persist receipt");
        }
    }

    /// Synthesize and send the acknowledgment for a first-time data message.
    async fn acknowledge(&self, via_channel: &str, message: &Message) {
        let ack = Message::acknowledgment(
            &self.own,
            message,
            via_channel,
            self.preferences.local_statements().await,
        );

        match self
            .broadcaster
            .send_message(&message.sender_locator, &ack)
            .await
        {
            Ok(results) => {
                if !any_success(&results) {
                    tracing::warn!(
                        ack_target = %message.id,
                        attempted = results.len(),
                        "Acknowledgment failed on every channel"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(ack_target = %message.id, error = %e, "Acknowledgment not sent");
            }
        }
    }

    /// Fold an inbound acknowledgment into the preference learner. Never
    /// emits outbound traffic.
    async fn process_ack(&self, receiving_channel: &str, ack: &Message) {
        let peer = ack.sender_locator.as_str();
        let worked_via = ack.ack_received_via.as_deref().unwrap_or(receiving_channel);

        let latency_ms = match ack.ack_target_id {
            Some(target) => self.round_trip_latency(target, ack).await,
            None => None,
        };
        self.preferences
            .record_ack(peer, worked_via, latency_ms)
            .await;

        if let Some(stated) = &ack.channel_preferences {
            self.preferences.apply_stated(peer, stated).await;
        }
    }

    /// Latency from our original send to the peer's receipt, when the
    /// original is still known.
    async fn round_trip_latency(&self, target: uuid::Uuid, ack: &Message) -> Option<u64> {
        let original = match self.store.get_message(target).await {
            Ok(Some(original)) => original,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(ack_target = %target, error = %e, "Failed to load ack target");
                return None;
            }
        };
        let received_at = ack.ack_received_at?;
        Some((received_at - original.created_at).max(0) as u64)
    }
}
