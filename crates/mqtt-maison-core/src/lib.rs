//! # mqtt-maison Core
//!
//! Broker-independent building blocks of the maison bridge.
//!
//! This crate provides:
//! - A generic event registry for one-to-many fan-out
//! - The closed set of canonical maison actions and the raw remote mapping
//! - Binary device state and its inversion for toggling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod registry;
pub mod state;

pub use action::{ActionMap, MaisonAction, UnknownAction};
pub use registry::{EventRegistry, FireSummary, ListenerHandle, ListenerId};
pub use state::{DeviceState, TargetState};
