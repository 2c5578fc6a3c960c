//! Read-modify-write of a binary device state over publish/subscribe.
//!
//! zigbee2mqtt answers a blank request on `{device}/get` with the device's
//! current state on `{device}`. The toggler installs a one-shot subscription
//! on `{device}` *before* sending the request, so the first message after the
//! request is taken as the reply. Requests carry no correlation token, so at
//! most one exchange per device may be in flight; a per-device lock enforces
//! that.

use crate::broker::{Broker, BrokerError};
use crate::once::OneShot;
use mqtt_maison_core::{DeviceState, TargetState};
use mqtt_maison_proto::{BinaryStatePayload, MessageError, TopicScheme};
use rumqttc::QoS;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Toggles binary devices through zigbee2mqtt.
pub struct DeviceToggler {
    broker: Arc<dyn Broker>,
    topics: TopicScheme,
    reply_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeviceToggler {
    /// Create a toggler.
    ///
    /// `reply_timeout` bounds the wait for a device's state report.
    pub fn new(broker: Arc<dyn Broker>, topics: TopicScheme, reply_timeout: Duration) -> Self {
        Self {
            broker,
            topics,
            reply_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Flip a device's state.
    ///
    /// Reads the current state, publishes its inverse on `{device}/set` and
    /// returns the published target. A device whose state cannot be
    /// determined (malformed report or no reply in time) is sent `TOGGLE`.
    ///
    /// # Errors
    ///
    /// Returns error if subscribing or publishing fails.
    pub async fn toggle(&self, device: &str) -> Result<TargetState, ToggleError> {
        let lock = self.device_lock(device);
        let _guard = lock.lock().await;

        let current = self.read_state(device).await?;
        let target = current.inverted();
        self.publish_target(device, target).await?;

        tracing::info!(device, ?current, %target, "Toggled device");
        Ok(target)
    }

    /// Ask a device for its current state.
    ///
    /// # Errors
    ///
    /// Returns error if subscribing or publishing fails.
    pub async fn query_state(&self, device: &str) -> Result<DeviceState, ToggleError> {
        let lock = self.device_lock(device);
        let _guard = lock.lock().await;

        self.read_state(device).await
    }

    /// Drive a device to `target` and wait for it to report that state.
    ///
    /// Returns whether the device confirmed within the reply timeout.
    /// `TOGGLE` has no state to confirm, so it is published without waiting.
    ///
    /// # Errors
    ///
    /// Returns error if subscribing or publishing fails.
    pub async fn set_state(&self, device: &str, target: TargetState) -> Result<bool, ToggleError> {
        let lock = self.device_lock(device);
        let _guard = lock.lock().await;

        if target == TargetState::Toggle {
            self.publish_target(device, target).await?;
            return Ok(false);
        }

        let wanted = DeviceState::from_reported(target.as_str());
        let confirmation = OneShot::subscribe_matching(
            self.broker.as_ref(),
            &self.topics.device(device),
            QoS::AtMostOnce,
            move |event| BinaryStatePayload::device_state(&event.payload) == wanted,
        )
        .await?;

        if let Err(err) = self.publish_target(device, target).await {
            confirmation.cancel();
            return Err(err);
        }

        match confirmation.recv(self.reply_timeout).await {
            Ok(_) => {
                tracing::debug!(device, %target, "Device confirmed state");
                Ok(true)
            }
            Err(BrokerError::Timeout(waited)) => {
                tracing::warn!(device, %target, ?waited, "Device did not confirm state");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn read_state(&self, device: &str) -> Result<DeviceState, ToggleError> {
        let state_topic = self.topics.device(device);
        let reply = OneShot::subscribe(self.broker.as_ref(), &state_topic, QoS::AtMostOnce).await?;

        let request = BinaryStatePayload::query().to_json()?;
        if let Err(err) = self
            .broker
            .publish(&self.topics.device_get(device), request)
            .await
        {
            reply.cancel();
            return Err(err.into());
        }

        match reply.recv(self.reply_timeout).await {
            Ok(event) => {
                let state = BinaryStatePayload::device_state(&event.payload);
                if state == DeviceState::Unknown {
                    tracing::warn!(
                        device,
                        payload = %event.payload_str(),
                        "Could not determine device state"
                    );
                }
                Ok(state)
            }
            Err(BrokerError::Timeout(waited)) => {
                tracing::warn!(device, ?waited, "No state reply from device");
                Ok(DeviceState::Unknown)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn publish_target(&self, device: &str, target: TargetState) -> Result<(), ToggleError> {
        let command = BinaryStatePayload::command(target).to_json()?;
        self.broker
            .publish(&self.topics.device_set(device), command)
            .await?;
        Ok(())
    }

    fn device_lock(&self, device: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(device.to_string()).or_default())
    }
}

/// Errors from a toggle exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    /// Broker operation failed
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// Payload could not be encoded
    #[error(transparent)]
    Message(#[from] MessageError),
}
