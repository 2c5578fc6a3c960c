//! Worker on the application action topic.
//!
//! Every envelope is validated and logged. With a dispatcher attached, each
//! valid action runs as its own task so a slow device exchange does not hold
//! up the next action; dropping the worker aborts the ones still running.

use crate::dispatch::ActionDispatcher;
use chrono::Local;
use mqtt_maison_adapter_z2m::MessageEvent;
use mqtt_maison_proto::ActionPayload;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Log every envelope on the action topic and dispatch it if asked to.
pub async fn run(
    mut events: mpsc::UnboundedReceiver<MessageEvent>,
    dispatcher: Option<Arc<ActionDispatcher>>,
) {
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let (Some(payload), Some(dispatcher)) = (inspect(&event), &dispatcher) else {
                    continue;
                };
                let dispatcher = Arc::clone(dispatcher);
                running.spawn(async move { dispatcher.handle(payload.action).await });
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(err) = finished {
                    tracing::error!(error = %err, "Action task failed");
                }
            }
        }
    }

    tracing::debug!(running = running.len(), "Action queue closed");
    while let Some(finished) = running.join_next().await {
        if let Err(err) = finished {
            tracing::error!(error = %err, "Action task failed");
        }
    }
}

/// Validate and log one envelope.
pub fn inspect(event: &MessageEvent) -> Option<ActionPayload> {
    let payload = match ActionPayload::parse(&event.payload) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(
                topic = %event.topic,
                payload = %event.payload_str(),
                error = %err,
                "Invalid maison action"
            );
            return None;
        }
    };

    // parse() already validated dob
    let age_ms = payload.age_ms(&Local::now()).unwrap_or_default();
    tracing::info!(
        topic = %event.topic,
        action = %payload.action,
        dob = %payload.dob,
        age_ms,
        "Maison action"
    );
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceGroups;
    use mqtt_maison_adapter_z2m::{Broker, DeviceToggler, MemoryBroker};
    use mqtt_maison_core::MaisonAction;
    use mqtt_maison_proto::TopicScheme;
    use std::time::Duration;

    #[test]
    fn valid_envelope() {
        let body = ActionPayload::new(MaisonAction::DotLong).to_json().unwrap();

        let payload = inspect(&MessageEvent::new("ezd/rmt_ctrl", body)).unwrap();

        assert_eq!(payload.action, MaisonAction::DotLong);
    }

    #[test]
    fn invalid_envelope() {
        assert!(inspect(&MessageEvent::new("ezd/rmt_ctrl", r#"{"action":"main"}"#)).is_none());
        assert!(inspect(&MessageEvent::new("ezd/rmt_ctrl", "main")).is_none());
    }

    fn envelope(action: MaisonAction) -> MessageEvent {
        MessageEvent::new("ezd/rmt_ctrl", ActionPayload::new(action).to_json().unwrap())
    }

    #[tokio::test]
    async fn valid_actions_are_dispatched() {
        let broker = Arc::new(MemoryBroker::new());
        let toggler = DeviceToggler::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            TopicScheme::default(),
            Duration::from_millis(10),
        );
        let groups = DeviceGroups {
            power: vec!["croc".to_string()],
            ..DeviceGroups::default()
        };
        let dispatcher = ActionDispatcher::new(Arc::new(toggler), groups, Duration::ZERO);

        let (sender, events) = mpsc::unbounded_channel();
        sender.send(MessageEvent::new("ezd/rmt_ctrl", "up")).unwrap();
        sender.send(envelope(MaisonAction::Up)).unwrap();
        drop(sender);

        run(events, Some(Arc::new(dispatcher))).await;

        let sets = broker.published_on("zigbee2mqtt/croc/set");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].payload_str(), r#"{"state":"ON"}"#);
    }

    #[tokio::test]
    async fn monitor_only_touches_nothing() {
        let (sender, events) = mpsc::unbounded_channel();
        sender.send(envelope(MaisonAction::Up)).unwrap();
        drop(sender);

        // Returns once the queue closes
        tokio::time::timeout(Duration::from_secs(1), run(events, None))
            .await
            .unwrap();
    }
}
