//! Canonical maison actions and the raw remote action mapping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Semantic action published on the application topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaisonAction {
    /// Main (play/pause) button
    Main,
    /// Volume up press
    Up,
    /// Volume up held
    UpHold,
    /// Volume down press
    Down,
    /// Volume down held
    DownHold,
    /// Next track
    Next,
    /// Previous track
    Prev,
    /// Single-dot button, short press
    Dot,
    /// Single-dot button, double press
    DotDouble,
    /// Single-dot button, long press
    DotLong,
    /// Double-dot button, short press
    Dots,
    /// Double-dot button, double press
    DotsDouble,
    /// Double-dot button, long press; the Symfonisk table has no source for it
    DotsLong,
}

impl MaisonAction {
    /// Every canonical action.
    pub const ALL: [Self; 13] = [
        Self::Main,
        Self::Up,
        Self::UpHold,
        Self::Down,
        Self::DownHold,
        Self::Next,
        Self::Prev,
        Self::Dot,
        Self::DotDouble,
        Self::DotLong,
        Self::Dots,
        Self::DotsDouble,
        Self::DotsLong,
    ];

    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Up => "up",
            Self::UpHold => "up_hold",
            Self::Down => "down",
            Self::DownHold => "down_hold",
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Dot => "dot",
            Self::DotDouble => "dot_double",
            Self::DotLong => "dot_long",
            Self::Dots => "dots",
            Self::DotsDouble => "dots_double",
            Self::DotsLong => "dots_long",
        }
    }
}

impl fmt::Display for MaisonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaisonAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// A string that is not a canonical action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown maison action: {0}")]
pub struct UnknownAction(pub String);

/// Raw action names emitted by the IKEA Symfonisk remote.
const SYMFONISK_ACTIONS: [(&str, MaisonAction); 12] = [
    ("toggle", MaisonAction::Main),
    ("volume_up", MaisonAction::Up),
    ("volume_up_hold", MaisonAction::UpHold),
    ("volume_down", MaisonAction::Down),
    ("volume_down_hold", MaisonAction::DownHold),
    ("track_next", MaisonAction::Next),
    ("track_previous", MaisonAction::Prev),
    ("dots_1_short_release", MaisonAction::Dot),
    ("dots_1_double_press", MaisonAction::DotDouble),
    ("dots_1_long_release", MaisonAction::DotLong),
    ("dots_2_short_release", MaisonAction::Dots),
    ("dots_2_double_press", MaisonAction::DotsDouble),
];

/// Immutable lookup table from raw vendor action to canonical action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMap {
    entries: HashMap<String, MaisonAction>,
}

impl ActionMap {
    /// Build a table from `(raw, canonical)` pairs.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, MaisonAction)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(raw, action)| (raw.into(), action))
                .collect(),
        }
    }

    /// Table for the IKEA Symfonisk sound remote (gen 2).
    #[must_use]
    pub fn symfonisk() -> Self {
        Self::new(SYMFONISK_ACTIONS)
    }

    /// Resolve a raw action.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Option<MaisonAction> {
        self.entries.get(raw).copied()
    }

    /// Resolve a raw action to its wire name, or `""` when unmapped.
    #[must_use]
    pub fn map(&self, raw: &str) -> &'static str {
        self.resolve(raw).map_or("", MaisonAction::as_str)
    }

    /// Entries sorted by raw action name.
    #[must_use]
    pub fn entries(&self) -> Vec<(&str, MaisonAction)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(raw, action)| (raw.as_str(), *action))
            .collect();
        entries.sort_unstable_by_key(|(raw, _)| *raw);
        entries
    }
}

impl Default for ActionMap {
    fn default() -> Self {
        Self::symfonisk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symfonisk_mapping() {
        let map = ActionMap::symfonisk();

        assert_eq!(map.map("toggle"), "main");
        assert_eq!(map.map("dots_2_double_press"), "dots_double");
        assert_eq!(map.map("volume_up_hold"), "up_hold");
        assert_eq!(map.resolve("track_previous"), Some(MaisonAction::Prev));
    }

    #[test]
    fn unmapped_action_is_empty() {
        let map = ActionMap::symfonisk();

        assert_eq!(map.map("unknown_action_xyz"), "");
        assert_eq!(map.map(""), "");
        assert!(map.resolve("unknown_action_xyz").is_none());
    }

    #[test]
    fn symfonisk_sources() {
        let map = ActionMap::symfonisk();
        let mapped: Vec<MaisonAction> = map.entries().into_iter().map(|(_, a)| a).collect();

        for action in MaisonAction::ALL {
            let expected = action != MaisonAction::DotsLong;
            assert_eq!(mapped.contains(&action), expected, "{action}");
        }
    }

    #[test]
    fn action_names_round_trip() {
        for action in MaisonAction::ALL {
            assert_eq!(action.as_str().parse::<MaisonAction>(), Ok(action));
        }
        assert_eq!("dots_long".parse(), Ok(MaisonAction::DotsLong));
        assert_eq!(
            "volume_up".parse::<MaisonAction>(),
            Err(UnknownAction("volume_up".to_string()))
        );
    }

    #[test]
    fn custom_table() {
        let map = ActionMap::new([("on", MaisonAction::Up), ("off", MaisonAction::Down)]);

        assert_eq!(map.map("on"), "up");
        assert_eq!(map.map("toggle"), "");
    }
}
