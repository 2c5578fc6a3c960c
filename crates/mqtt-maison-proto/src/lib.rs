//! # mqtt-maison Protocol
//!
//! Wire payloads and MQTT topic scheme for the maison bridge.
//!
//! ## Messages
//!
//! - `RemoteActionPayload`: raw button event from a zigbee2mqtt remote
//! - `ActionPayload`: canonical action envelope with its creation time
//! - `BinaryStatePayload`: on/off state request, report, and command
//!
//! ## MQTT Topics
//!
//! Device topics: `{z2m_prefix}/{device}[/get|/set]`
//! Application topic: `{maison_prefix}/{action_topic}`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod messages;
pub mod topics;

pub use messages::{ActionPayload, BinaryStatePayload, MessageError, RemoteActionPayload};
pub use topics::TopicScheme;
