//! Broker client seam.

use async_trait::async_trait;
use mqtt_maison_core::ListenerHandle;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Topic the message arrived on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl MessageEvent {
    /// Create a message event.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Callback invoked for every message delivered on a subscribed topic.
///
/// Handlers run on the broker's delivery path and must not block.
pub type Handler = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Publish/subscribe access to a message broker.
///
/// Implementations must tolerate concurrent calls from several workers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe a handler to a topic.
    ///
    /// The returned handle detaches this handler only; the topic stays
    /// subscribed at the broker.
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Handler,
    ) -> Result<ListenerHandle, BrokerError>;

    /// Unsubscribe a topic and drop every handler attached to it.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError>;
}

/// Subscribe a topic and forward its messages into a queue.
///
/// Messages keep the order in which the broker delivered them.
///
/// # Errors
///
/// Returns error if the subscription fails.
pub async fn subscribe_queue(
    broker: &dyn Broker,
    topic: &str,
    qos: QoS,
) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<MessageEvent>), BrokerError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: Handler = Arc::new(move |event: &MessageEvent| {
        if tx.send(event.clone()).is_err() {
            tracing::debug!(topic = %event.topic, "Queue receiver dropped");
        }
    });

    let handle = broker.subscribe(topic, qos, handler).await?;
    Ok((handle, rx))
}

/// Errors from broker operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Unsubscription failed
    #[error("unsubscription error: {0}")]
    Unsubscribe(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Nothing arrived in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Subscription closed before a message arrived
    #[error("subscription closed: {0}")]
    Closed(String),
}
