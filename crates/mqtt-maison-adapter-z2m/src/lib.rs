//! # zigbee2mqtt Adapter
//!
//! Broker access and device control for the maison bridge.
//!
//! ## Components
//!
//! - [`Broker`]: the publish/subscribe seam, implemented by [`MqttBroker`]
//!   (rumqttc) and [`MemoryBroker`] (in-process)
//! - [`TopicRouter`]: fans inbound messages out to per-topic handlers and
//!   releases topics whose last handler is gone
//! - [`OneShot`]: a subscription that yields exactly one message
//! - [`DeviceToggler`]: the `/get` then `/set` exchange that flips an on/off
//!   device, and confirmed `/set` commands
//!
//! ## zigbee2mqtt Topics
//!
//! - `zigbee2mqtt/{device}`: state reports and remote events
//! - `zigbee2mqtt/{device}/get`: state requests
//! - `zigbee2mqtt/{device}/set`: commands

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod client;
pub mod memory;
pub mod once;
pub mod router;
pub mod toggle;

pub use broker::{subscribe_queue, Broker, BrokerError, Handler, MessageEvent};
pub use client::{MqttBroker, MqttBrokerConfig};
pub use memory::MemoryBroker;
pub use once::{OneShot, OneShotState};
pub use router::{ReleaseHook, TopicRouter};
pub use toggle::{DeviceToggler, ToggleError};

pub use rumqttc::QoS;
