//! Bridge runtime orchestration.

use crate::config::MaisonConfig;
use crate::dispatch::ActionDispatcher;
use crate::monitor;
use crate::remote::RemoteAdapter;
use anyhow::{Context, Result};
use mqtt_maison_adapter_z2m::{subscribe_queue, Broker, DeviceToggler, MqttBroker, QoS};
use mqtt_maison_core::{ActionMap, ListenerHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Running topic workers.
pub struct Workers {
    tasks: Vec<JoinHandle<()>>,
    subscriptions: Vec<ListenerHandle>,
}

impl Workers {
    /// Number of running workers.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Detach all handlers and stop the workers.
    ///
    /// Detaching the last handler of a topic unsubscribes it at the broker.
    pub fn shutdown(self) {
        for handle in &self.subscriptions {
            handle.unregister();
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

/// The maison bridge.
pub struct Bridge {
    config: MaisonConfig,
    actions: ActionMap,
}

impl Bridge {
    /// Create a bridge for the Symfonisk remote.
    pub fn new(config: MaisonConfig) -> Self {
        Self {
            config,
            actions: ActionMap::symfonisk(),
        }
    }

    /// Connect to the broker and run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the broker connection or a subscription fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting bridge");

        let (client, mut driver) = MqttBroker::connect(&self.config.broker)
            .await
            .context("Failed to connect to MQTT broker")?;
        let client = Arc::new(client);

        let workers = self.start(Arc::clone(&client) as Arc<dyn Broker>).await?;

        tracing::info!(workers = workers.len(), "Bridge running, press Ctrl+C to stop");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
            _ = &mut driver => {
                tracing::warn!("MQTT connection task ended");
            }
        }

        workers.shutdown();
        if let Err(err) = client.disconnect().await {
            tracing::warn!(error = %err, "Failed to disconnect cleanly");
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), driver).await;

        tracing::info!("Bridge stopped");
        Ok(())
    }

    /// Subscribe the bridge's topics and spawn one worker per topic.
    ///
    /// # Errors
    ///
    /// Returns error if a subscription fails.
    pub async fn start(&self, broker: Arc<dyn Broker>) -> Result<Workers> {
        let topics = &self.config.topics;
        let mut tasks = Vec::new();
        let mut subscriptions = Vec::new();

        let toggler = Arc::new(DeviceToggler::new(
            Arc::clone(&broker),
            topics.clone(),
            self.config.toggle_timeout,
        ));

        let remote_topic = topics.device(&self.config.remote_name);
        let (handle, remote_events) =
            subscribe_queue(broker.as_ref(), &remote_topic, QoS::AtLeastOnce)
                .await
                .with_context(|| format!("Failed to subscribe to {remote_topic}"))?;
        subscriptions.push(handle);
        tracing::info!(
            topic = %remote_topic,
            device = %self.config.target_device,
            "Adapting remote events"
        );

        let adapter = RemoteAdapter::new(
            Arc::clone(&broker),
            self.actions.clone(),
            topics.clone(),
            Arc::clone(&toggler),
            self.config.target_device.clone(),
        );
        tasks.push(tokio::spawn(adapter.run(remote_events)));

        if self.config.dispatch_actions || self.config.monitor_actions {
            let action_topic = topics.maison_actions();
            let (handle, action_events) =
                subscribe_queue(broker.as_ref(), &action_topic, QoS::AtMostOnce)
                    .await
                    .with_context(|| format!("Failed to subscribe to {action_topic}"))?;
            subscriptions.push(handle);

            let dispatcher = self.config.dispatch_actions.then(|| {
                Arc::new(ActionDispatcher::new(
                    toggler,
                    self.config.devices.clone(),
                    self.config.blink_interval,
                ))
            });
            tracing::info!(
                topic = %action_topic,
                dispatch = dispatcher.is_some(),
                "Listening for maison actions"
            );

            tasks.push(tokio::spawn(monitor::run(action_events, dispatcher)));
        }

        Ok(Workers {
            tasks,
            subscriptions,
        })
    }
}
