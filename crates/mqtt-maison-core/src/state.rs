//! Binary on/off device state as reported by zigbee2mqtt.

use std::fmt;

/// Current state of a two-valued device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Device reports `ON`
    On,
    /// Device reports `OFF`
    Off,
    /// Anything else, including a missing or malformed report
    Unknown,
}

impl DeviceState {
    /// Interpret a reported state value.
    #[must_use]
    pub fn from_reported(value: &str) -> Self {
        match value {
            "ON" => Self::On,
            "OFF" => Self::Off,
            _ => Self::Unknown,
        }
    }

    /// Command that flips this state.
    ///
    /// An undetermined state yields [`TargetState::Toggle`], leaving the flip
    /// to the device itself.
    #[must_use]
    pub const fn inverted(self) -> TargetState {
        match self {
            Self::On => TargetState::Off,
            Self::Off => TargetState::On,
            Self::Unknown => TargetState::Toggle,
        }
    }
}

/// Desired state published on a device's `/set` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    /// Switch on
    On,
    /// Switch off
    Off,
    /// Let the device flip whatever state it is in
    Toggle,
}

impl TargetState {
    /// Wire value of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Toggle => "TOGGLE",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
