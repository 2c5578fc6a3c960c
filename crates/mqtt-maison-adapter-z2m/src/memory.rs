//! In-process broker.
//!
//! Delivers publishes to local subscribers of the exact topic and lets
//! callers script device behavior with responders. Every publish is recorded
//! so assertions can inspect outbound traffic, and every topic that stops
//! being subscribed is recorded in unsubscribe order.

use crate::broker::{Broker, BrokerError, Handler, MessageEvent};
use crate::router::TopicRouter;
use async_trait::async_trait;
use mqtt_maison_core::ListenerHandle;
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Responder = Arc<dyn Fn(&MessageEvent) -> Vec<MessageEvent> + Send + Sync>;

/// Broker that lives entirely in memory.
pub struct MemoryBroker {
    router: TopicRouter,
    published: Mutex<Vec<MessageEvent>>,
    unsubscribed: Arc<Mutex<Vec<String>>>,
    responders: Mutex<Vec<(String, Responder)>>,
    reject_publishes: AtomicBool,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        let unsubscribed = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::clone(&unsubscribed);
        Self {
            router: TopicRouter::with_release(move |topic| {
                lock(&released).push(topic.to_string());
            }),
            published: Mutex::new(Vec::new()),
            unsubscribed,
            responders: Mutex::new(Vec::new()),
            reject_publishes: AtomicBool::new(false),
        }
    }

    /// Answer every publish on `topic` with the messages `respond` returns.
    ///
    /// Replies are delivered synchronously, before `publish` returns, and only
    /// to topics that currently have subscribers.
    pub fn respond_to<F>(&self, topic: &str, respond: F)
    where
        F: Fn(&MessageEvent) -> Vec<MessageEvent> + Send + Sync + 'static,
    {
        lock(&self.responders).push((topic.to_string(), Arc::new(respond)));
    }

    /// Simulate an inbound message from the broker.
    ///
    /// Returns `false` if nobody is subscribed to the topic.
    pub fn inject(&self, event: &MessageEvent) -> bool {
        self.router.dispatch(event)
    }

    /// Make every following publish fail.
    pub fn reject_publishes(&self, reject: bool) {
        self.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// All accepted publishes, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<MessageEvent> {
        lock(&self.published).clone()
    }

    /// Accepted publishes on one topic, oldest first.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<MessageEvent> {
        lock(&self.published)
            .iter()
            .filter(|event| event.topic == topic)
            .cloned()
            .collect()
    }

    /// Topics unsubscribed explicitly or released with their last handler,
    /// in order.
    #[must_use]
    pub fn unsubscribed(&self) -> Vec<String> {
        lock(&self.unsubscribed).clone()
    }

    /// Whether a topic is currently subscribed.
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.router.has_route(topic)
    }

    fn deliver(&self, event: &MessageEvent) {
        if self.router.has_route(&event.topic) {
            self.router.dispatch(event);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.reject_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish(format!("{topic}: rejected")));
        }

        let event = MessageEvent::new(topic, payload);
        lock(&self.published).push(event.clone());
        self.deliver(&event);

        let responders: Vec<Responder> = lock(&self.responders)
            .iter()
            .filter(|(responder_topic, _)| responder_topic == topic)
            .map(|(_, respond)| Arc::clone(respond))
            .collect();
        for respond in responders {
            for reply in respond(&event) {
                self.deliver(&reply);
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Handler,
    ) -> Result<ListenerHandle, BrokerError> {
        Ok(self.router.register(topic, qos, handler))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        lock(&self.unsubscribed).push(topic.to_string());
        self.router.remove(topic);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
