//! One-shot subscriptions.
//!
//! A [`OneShot`] processes at most one message from its topic. Its state only
//! moves forward: `Waiting -> Delivered -> Unsubscribed`, or straight from
//! `Waiting` to `Unsubscribed` when nothing arrives. Dropping a `OneShot`,
//! including dropping the future of an aborted task that owns one, detaches
//! its handler; the broker subscription goes with the topic's last handler.

use crate::broker::{Broker, BrokerError, Handler, MessageEvent};
use mqtt_maison_core::ListenerHandle;
use rumqttc::QoS;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

const WAITING: u8 = 0;
const DELIVERED: u8 = 1;
const UNSUBSCRIBED: u8 = 2;

/// Lifecycle of a one-shot subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShotState {
    /// Subscribed, nothing received yet
    Waiting,
    /// First message taken; later ones are dropped
    Delivered,
    /// Handler detached
    Unsubscribed,
}

impl OneShotState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            WAITING => Self::Waiting,
            DELIVERED => Self::Delivered,
            _ => Self::Unsubscribed,
        }
    }
}

/// Subscription that yields the first message on a topic.
pub struct OneShot {
    topic: String,
    state: Arc<AtomicU8>,
    handle: ListenerHandle,
    reply: oneshot::Receiver<MessageEvent>,
}

impl OneShot {
    /// Install the subscription.
    ///
    /// # Errors
    ///
    /// Returns error if the broker rejects the subscription.
    pub async fn subscribe(
        broker: &dyn Broker,
        topic: &str,
        qos: QoS,
    ) -> Result<Self, BrokerError> {
        Self::subscribe_matching(broker, topic, qos, |_| true).await
    }

    /// Install a subscription that takes the first message accepted by
    /// `accept`. Rejected messages leave the subscription waiting.
    ///
    /// # Errors
    ///
    /// Returns error if the broker rejects the subscription.
    pub async fn subscribe_matching<F>(
        broker: &dyn Broker,
        topic: &str,
        qos: QoS,
        accept: F,
    ) -> Result<Self, BrokerError>
    where
        F: Fn(&MessageEvent) -> bool + Send + Sync + 'static,
    {
        let state = Arc::new(AtomicU8::new(WAITING));
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let handler_state = Arc::clone(&state);
        let handler: Handler = Arc::new(move |event: &MessageEvent| {
            if handler_state.load(Ordering::Acquire) == WAITING && !accept(event) {
                return;
            }
            if handler_state
                .compare_exchange(WAITING, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                tracing::debug!(topic = %event.topic, "Dropping message after one-shot delivery");
                return;
            }
            let sender = tx.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                // The receiver is gone only if the waiter already gave up.
                let _ = sender.send(event.clone());
            }
        });

        let handle = broker.subscribe(topic, qos, handler).await?;

        Ok(Self {
            topic: topic.to_string(),
            state,
            handle,
            reply: rx,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OneShotState {
        OneShotState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Wait for the first message, then detach.
    ///
    /// The subscription is torn down whether or not a message arrived.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Timeout`] if nothing arrives within `timeout`,
    /// or [`BrokerError::Closed`] if the topic was unsubscribed elsewhere.
    pub async fn recv(mut self, timeout: Duration) -> Result<MessageEvent, BrokerError> {
        let outcome = match tokio::time::timeout(timeout, &mut self.reply).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(BrokerError::Closed(self.topic.clone())),
            Err(_) => Err(BrokerError::Timeout(timeout)),
        };
        self.release();
        outcome
    }

    /// Tear down without waiting.
    pub fn cancel(self) {
        self.release();
    }

    fn release(&self) {
        if self.state.swap(UNSUBSCRIBED, Ordering::AcqRel) != UNSUBSCRIBED {
            self.handle.unregister();
        }
    }
}

impl Drop for OneShot {
    fn drop(&mut self) {
        self.release();
    }
}
