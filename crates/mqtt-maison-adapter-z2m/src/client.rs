//! rumqttc-backed broker client.

use crate::broker::{Broker, BrokerError, Handler, MessageEvent};
use crate::router::TopicRouter;
use async_trait::async_trait;
use mqtt_maison_core::ListenerHandle;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Configuration for the MQTT broker connection.
#[derive(Debug, Clone)]
pub struct MqttBrokerConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker_url: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Broker username
    pub username: Option<String>,
    /// Broker password
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// How long to wait for the broker to accept the connection
    pub connect_timeout: Duration,
    /// QoS for outbound publishes
    pub publish_qos: QoS,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: "mqtt-maison".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            publish_qos: QoS::AtLeastOnce,
        }
    }
}

/// Broker client over a single MQTT connection.
///
/// Cheap to share behind an `Arc`; rumqttc's `AsyncClient` accepts
/// concurrent requests.
pub struct MqttBroker {
    client: AsyncClient,
    router: Arc<TopicRouter>,
    publish_qos: QoS,
}

impl MqttBroker {
    /// Connect to the broker.
    ///
    /// Waits for the broker's `ConnAck`, then spawns the task that drives the
    /// connection and dispatches inbound messages. The task's handle is
    /// returned alongside the client.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid, the broker refuses the connection,
    /// or no `ConnAck` arrives within the connect timeout.
    pub async fn connect(config: &MqttBrokerConfig) -> Result<(Self, JoinHandle<()>), BrokerError> {
        let (host, port) = parse_mqtt_url(&config.broker_url)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        if let Some(username) = &config.username {
            mqtt_options.set_credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

        tracing::info!(
            broker = %config.broker_url,
            client_id = %config.client_id,
            "Connecting to MQTT broker"
        );
        tokio::time::timeout(config.connect_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BrokerError::Timeout(config.connect_timeout))??;
        tracing::info!("Connected to MQTT broker");

        let router = Arc::new(TopicRouter::with_release({
            let client = client.clone();
            move |topic| {
                if let Err(e) = client.try_unsubscribe(topic) {
                    tracing::warn!(error = %e, topic, "Failed to unsubscribe released topic");
                }
            }
        }));
        let driver = tokio::spawn(drive(eventloop, client.clone(), Arc::clone(&router)));

        Ok((
            Self {
                client,
                router,
                publish_qos: config.publish_qos,
            },
            driver,
        ))
    }

    /// Send a clean disconnect.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        tracing::debug!(topic, payload_len = payload.len(), "Publishing");

        self.client
            .publish(topic, self.publish_qos, false, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: Handler,
    ) -> Result<ListenerHandle, BrokerError> {
        tracing::debug!(topic, ?qos, "Subscribing");

        let handle = self.router.register(topic, qos, handler);
        if let Err(e) = self.client.subscribe(topic, qos).await {
            handle.unregister();
            return Err(BrokerError::Subscribe(e.to_string()));
        }

        Ok(handle)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BrokerError> {
        tracing::debug!(topic, "Unsubscribing");

        self.router.remove(topic);
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| BrokerError::Unsubscribe(e.to_string()))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(BrokerError::Connection(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(BrokerError::Connection(e.to_string())),
        }
    }
}

/// Poll the connection forever, routing inbound publishes.
async fn drive(mut eventloop: EventLoop, client: AsyncClient, router: Arc<TopicRouter>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = MessageEvent::new(publish.topic.clone(), publish.payload.to_vec());

                tracing::debug!(
                    topic = %event.topic,
                    payload_len = event.payload.len(),
                    "Received MQTT message"
                );

                router.dispatch(&event);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Reconnected to MQTT broker");
                // Clean sessions lose their subscriptions on reconnect.
                for (topic, qos) in router.subscriptions() {
                    if let Err(e) = client.try_subscribe(topic.as_str(), qos) {
                        tracing::warn!(error = %e, %topic, "Failed to restore subscription");
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                tracing::debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                tracing::info!("Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "MQTT error");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), BrokerError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| BrokerError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(BrokerError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BrokerError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| BrokerError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(BrokerError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}
