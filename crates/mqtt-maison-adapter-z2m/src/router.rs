//! Topic to handler routing.
//!
//! Each subscribed topic owns an [`EventRegistry`]; inbound messages fan out
//! to every handler registered for their exact topic. A route lives only as
//! long as it has handlers: once the last one is gone the route is dropped
//! and the release hook tells the broker to stop delivering the topic.

use crate::broker::{Handler, MessageEvent};
use mqtt_maison_core::{EventRegistry, ListenerHandle};
use rumqttc::QoS;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Routes = Mutex<HashMap<String, Route>>;

/// Called with a topic whose route was dropped because no handler remained.
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

struct Route {
    qos: QoS,
    registry: EventRegistry<MessageEvent>,
}

/// Routes inbound messages to the handlers of their topic.
pub struct TopicRouter {
    routes: Arc<Routes>,
    release: ReleaseHook,
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("topics", &lock(&self.routes).keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TopicRouter {
    /// Create an empty router that releases topics silently.
    #[must_use]
    pub fn new() -> Self {
        Self::with_release(|_| {})
    }

    /// Create an empty router that calls `release` for every dropped route.
    pub fn with_release<F>(release: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            release: Arc::new(release),
        }
    }

    /// Attach a handler to a topic, creating the route if needed.
    ///
    /// The route keeps the QoS of its most recent registration. Unregistering
    /// the last handler of a route releases the topic.
    pub fn register(&self, topic: &str, qos: QoS, handler: Handler) -> ListenerHandle {
        let mut routes = lock(&self.routes);
        let route = routes.entry(topic.to_string()).or_insert_with(|| Route {
            qos,
            registry: EventRegistry::new(),
        });
        route.qos = qos;
        let registry = route.registry.clone();
        let handle = route
            .registry
            .register(move |event: &MessageEvent| handler(event));

        let routes: Weak<Routes> = Arc::downgrade(&self.routes);
        let release = Arc::clone(&self.release);
        let topic = topic.to_string();
        handle.and_then(move |_| {
            if let Some(routes) = routes.upgrade() {
                release_if_unused(&routes, &release, &topic, &registry);
            }
        })
    }

    /// Deliver a message to its topic's handlers.
    ///
    /// Returns `false` if the topic has no route.
    pub fn dispatch(&self, event: &MessageEvent) -> bool {
        let registry = lock(&self.routes)
            .get(&event.topic)
            .map(|route| route.registry.clone());

        let Some(registry) = registry else {
            tracing::warn!(topic = %event.topic, "No handlers for message received on topic");
            return false;
        };

        if registry.is_empty() {
            tracing::warn!(topic = %event.topic, "Message with no handler");
            release_if_unused(&self.routes, &self.release, &event.topic, &registry);
            return true;
        }

        let summary = registry.fire(event);
        if !summary.failed.is_empty() {
            tracing::warn!(
                topic = %event.topic,
                failed = summary.failed.len(),
                "Some handlers failed"
            );
        }
        true
    }

    /// Drop a topic's route and all of its handlers without calling the
    /// release hook.
    ///
    /// Returns `false` if the topic had no route.
    pub fn remove(&self, topic: &str) -> bool {
        let route = lock(&self.routes).remove(topic);
        route.map(|route| route.registry.clear()).is_some()
    }

    /// Whether a topic has a route.
    #[must_use]
    pub fn has_route(&self, topic: &str) -> bool {
        lock(&self.routes).contains_key(topic)
    }

    /// Routed topics and their QoS, sorted by topic.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        let mut subscriptions: Vec<_> = lock(&self.routes)
            .iter()
            .map(|(topic, route)| (topic.clone(), route.qos))
            .collect();
        subscriptions.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        subscriptions
    }
}

/// Drop `topic`'s route if it is still `registry` and has no handler left.
fn release_if_unused(
    routes: &Routes,
    release: &ReleaseHook,
    topic: &str,
    registry: &EventRegistry<MessageEvent>,
) {
    let released = {
        let mut routes = lock(routes);
        let unused = routes
            .get(topic)
            .is_some_and(|route| route.registry.same_as(registry) && route.registry.is_empty());
        if unused {
            routes.remove(topic);
        }
        unused
    };

    if released {
        tracing::debug!(topic, "Releasing topic with no handlers");
        release(topic);
    }
}

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<String, Route>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Handler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_ref = Arc::clone(&seen);
        let handler: Handler = Arc::new(move |event: &MessageEvent| {
            seen_ref
                .lock()
                .unwrap()
                .push(event.payload_str().into_owned());
        });
        (handler, seen)
    }

    #[test]
    fn dispatch_by_exact_topic() {
        let router = TopicRouter::new();
        let (handler, seen) = collector();
        router.register("zigbee2mqtt/croc", QoS::AtMostOnce, handler);

        assert!(router.dispatch(&MessageEvent::new("zigbee2mqtt/croc", "a")));
        assert!(!router.dispatch(&MessageEvent::new("zigbee2mqtt/croc/set", "b")));

        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn handle_detaches_single_handler() {
        let router = TopicRouter::new();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        let off = router.register("ezd/rmt_ctrl", QoS::AtLeastOnce, first);
        router.register("ezd/rmt_ctrl", QoS::AtLeastOnce, second);

        off.unregister();
        router.dispatch(&MessageEvent::new("ezd/rmt_ctrl", "x"));

        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec!["x"]);
        assert!(router.has_route("ezd/rmt_ctrl"));
    }

    fn releasing_router() -> (TopicRouter, Arc<Mutex<Vec<String>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let released_ref = Arc::clone(&released);
        let router = TopicRouter::with_release(move |topic| {
            released_ref.lock().unwrap().push(topic.to_string());
        });
        (router, released)
    }

    #[test]
    fn last_handler_releases_topic() {
        let (router, released) = releasing_router();
        let (first, _) = collector();
        let (second, _) = collector();
        let first = router.register("zigbee2mqtt/croc", QoS::AtMostOnce, first);
        let second = router.register("zigbee2mqtt/croc", QoS::AtMostOnce, second);

        first.unregister();
        assert!(router.has_route("zigbee2mqtt/croc"));
        assert!(released.lock().unwrap().is_empty());

        second.unregister();
        second.unregister();
        assert!(!router.has_route("zigbee2mqtt/croc"));
        assert!(router.subscriptions().is_empty());
        assert_eq!(*released.lock().unwrap(), vec!["zigbee2mqtt/croc"]);
        assert!(!router.dispatch(&MessageEvent::new("zigbee2mqtt/croc", "late")));
    }

    #[test]
    fn stale_handle_keeps_new_route() {
        let (router, released) = releasing_router();
        let (handler, seen) = collector();
        let stale = router.register("zigbee2mqtt/croc", QoS::AtMostOnce, Arc::clone(&handler));
        stale.unregister();

        router.register("zigbee2mqtt/croc", QoS::AtMostOnce, handler);
        stale.unregister();

        assert!(router.dispatch(&MessageEvent::new("zigbee2mqtt/croc", "fresh")));
        assert_eq!(*seen.lock().unwrap(), vec!["fresh"]);
        assert_eq!(*released.lock().unwrap(), vec!["zigbee2mqtt/croc"]);
    }

    #[test]
    fn explicit_remove_skips_release() {
        let (router, released) = releasing_router();
        let (handler, _) = collector();
        let off = router.register("zigbee2mqtt/croc", QoS::AtMostOnce, handler);

        assert!(router.remove("zigbee2mqtt/croc"));
        off.unregister();

        assert!(released.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_drops_route() {
        let router = TopicRouter::new();
        let (handler, seen) = collector();
        router.register("zigbee2mqtt/croc", QoS::AtMostOnce, handler);

        assert!(router.remove("zigbee2mqtt/croc"));
        assert!(!router.remove("zigbee2mqtt/croc"));
        assert!(!router.dispatch(&MessageEvent::new("zigbee2mqtt/croc", "late")));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn subscriptions_are_sorted() {
        let router = TopicRouter::new();
        let (handler, _) = collector();
        router.register("zigbee2mqtt/remote", QoS::AtLeastOnce, Arc::clone(&handler));
        router.register("ezd/rmt_ctrl", QoS::AtMostOnce, handler);

        assert_eq!(
            router.subscriptions(),
            vec![
                ("ezd/rmt_ctrl".to_string(), QoS::AtMostOnce),
                ("zigbee2mqtt/remote".to_string(), QoS::AtLeastOnce),
            ]
        );
    }
}
