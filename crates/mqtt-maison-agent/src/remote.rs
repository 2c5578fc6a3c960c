//! Remote control adapter.
//!
//! Turns raw zigbee2mqtt remote events into maison action envelopes on the
//! application topic. The literal command `toggle` instead flips the target
//! device directly.

use mqtt_maison_adapter_z2m::{Broker, DeviceToggler, MessageEvent};
use mqtt_maison_core::{ActionMap, MaisonAction, TargetState};
use mqtt_maison_proto::{ActionPayload, RemoteActionPayload, TopicScheme};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw payload that triggers a device toggle.
const TOGGLE_COMMAND: &str = "toggle";

/// What became of one inbound remote event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Envelope published on the action topic
    Published(MaisonAction),
    /// Target device toggled
    Toggled(TargetState),
    /// Event dropped; the reason has been logged
    Dropped,
}

/// Adapts remote events for one remote control.
pub struct RemoteAdapter {
    broker: Arc<dyn Broker>,
    actions: ActionMap,
    topics: TopicScheme,
    toggler: Arc<DeviceToggler>,
    target_device: String,
}

impl RemoteAdapter {
    /// Create an adapter.
    pub fn new(
        broker: Arc<dyn Broker>,
        actions: ActionMap,
        topics: TopicScheme,
        toggler: Arc<DeviceToggler>,
        target_device: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            actions,
            topics,
            toggler,
            target_device: target_device.into(),
        }
    }

    /// Process events until the queue closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<MessageEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(&event).await;
        }
        tracing::debug!("Remote event queue closed");
    }

    /// Process one raw remote event.
    pub async fn handle(&self, event: &MessageEvent) -> Outcome {
        if event.payload_str().trim() == TOGGLE_COMMAND {
            return self.toggle_target().await;
        }

        let remote = match RemoteActionPayload::from_json(&event.payload) {
            Ok(remote) => remote,
            Err(err) => {
                tracing::error!(topic = %event.topic, error = %err, "Failed to decode remote event");
                return Outcome::Dropped;
            }
        };

        let Some(action) = self.actions.resolve(&remote.action) else {
            tracing::warn!(
                topic = %event.topic,
                action = %remote.action,
                "No mapping for action"
            );
            return Outcome::Dropped;
        };

        self.publish(action).await
    }

    async fn toggle_target(&self) -> Outcome {
        match self.toggler.toggle(&self.target_device).await {
            Ok(target) => Outcome::Toggled(target),
            Err(err) => {
                tracing::error!(device = %self.target_device, error = %err, "Toggle failed");
                Outcome::Dropped
            }
        }
    }

    async fn publish(&self, action: MaisonAction) -> Outcome {
        let topic = self.topics.maison_actions();
        let payload = match ActionPayload::new(action).to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(%action, error = %err, "Failed to encode maison action");
                return Outcome::Dropped;
            }
        };

        if let Err(err) = self.broker.publish(&topic, payload).await {
            tracing::error!(%topic, %action, error = %err, "Failed to publish maison action");
            return Outcome::Dropped;
        }

        tracing::info!(%topic, %action, "Published maison action");
        Outcome::Published(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqtt_maison_adapter_z2m::MemoryBroker;
    use std::time::Duration;

    const REMOTE_TOPIC: &str = "zigbee2mqtt/symfonisk_remote";

    fn adapter(broker: &Arc<MemoryBroker>) -> RemoteAdapter {
        let broker = Arc::clone(broker) as Arc<dyn Broker>;
        let topics = TopicScheme::default();
        let toggler = Arc::new(DeviceToggler::new(
            Arc::clone(&broker),
            topics.clone(),
            Duration::from_millis(50),
        ));
        RemoteAdapter::new(broker, ActionMap::symfonisk(), topics, toggler, "croc")
    }

    #[tokio::test]
    async fn mapped_action_is_republished() {
        let broker = Arc::new(MemoryBroker::new());

        let outcome = adapter(&broker)
            .handle(&MessageEvent::new(REMOTE_TOPIC, r#"{"action":"volume_up"}"#))
            .await;

        assert_eq!(outcome, Outcome::Published(MaisonAction::Up));
        let published = broker.published_on("ezd/rmt_ctrl");
        assert_eq!(published.len(), 1);
        let envelope = ActionPayload::parse(&published[0].payload).unwrap();
        assert_eq!(envelope.action, MaisonAction::Up);
    }

    #[tokio::test]
    async fn unmapped_action_is_dropped() {
        let broker = Arc::new(MemoryBroker::new());

        let outcome = adapter(&broker)
            .handle(&MessageEvent::new(REMOTE_TOPIC, r#"{"action":"brightness_move_up"}"#))
            .await;

        assert_eq!(outcome, Outcome::Dropped);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let broker = Arc::new(MemoryBroker::new());
        let adapter = adapter(&broker);

        for payload in ["", "{", r#"{"battery":80}"#, r#"{"action":3}"#] {
            let outcome = adapter.handle(&MessageEvent::new(REMOTE_TOPIC, payload)).await;
            assert_eq!(outcome, Outcome::Dropped);
        }
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn toggle_command_flips_target() {
        let broker = Arc::new(MemoryBroker::new());
        broker.respond_to("zigbee2mqtt/croc/get", |_| {
            vec![MessageEvent::new("zigbee2mqtt/croc", r#"{"state":"ON"}"#)]
        });

        let outcome = adapter(&broker)
            .handle(&MessageEvent::new(REMOTE_TOPIC, "toggle\n"))
            .await;

        assert_eq!(outcome, Outcome::Toggled(TargetState::Off));
        assert!(broker.published_on("ezd/rmt_ctrl").is_empty());
        let sets = broker.published_on("zigbee2mqtt/croc/set");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].payload_str(), r#"{"state":"OFF"}"#);
    }

    #[tokio::test]
    async fn publish_failure_is_dropped() {
        let broker = Arc::new(MemoryBroker::new());
        broker.reject_publishes(true);

        let outcome = adapter(&broker)
            .handle(&MessageEvent::new(REMOTE_TOPIC, r#"{"action":"track_next"}"#))
            .await;

        assert_eq!(outcome, Outcome::Dropped);
    }
}
