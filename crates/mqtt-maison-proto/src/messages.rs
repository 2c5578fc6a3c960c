//! JSON payloads exchanged over the broker.

use chrono::{DateTime, FixedOffset, Local, SecondsFormat, TimeZone};
use mqtt_maison_core::{DeviceState, MaisonAction, TargetState};
use serde::{Deserialize, Serialize};

/// Button event published by a zigbee2mqtt remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActionPayload {
    /// Raw vendor action name
    pub action: String,
}

impl RemoteActionPayload {
    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not an object with a string `action`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Canonical action republished on the application topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Canonical action
    pub action: MaisonAction,
    /// Creation time, ISO 8601 with milliseconds and offset
    pub dob: String,
}

impl ActionPayload {
    /// Create an envelope stamped with the current local time.
    #[must_use]
    pub fn new(action: MaisonAction) -> Self {
        Self::at(action, &Local::now())
    }

    /// Create an envelope stamped with the given time.
    #[must_use]
    pub fn at<Tz>(action: MaisonAction, dob: &DateTime<Tz>) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        Self {
            action,
            dob: format_dob(dob),
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Strictly decode an envelope.
    ///
    /// The payload must be an object whose `action` is a canonical action and
    /// whose `dob` is an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns error naming the first violated constraint.
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))?;
        let object = value.as_object().ok_or(MessageError::NotAnObject)?;

        let action = object
            .get("action")
            .and_then(serde_json::Value::as_str)
            .ok_or(MessageError::MissingField("action"))?;
        let action = action
            .parse::<MaisonAction>()
            .map_err(|e| MessageError::InvalidAction(e.0))?;

        let dob = object
            .get("dob")
            .and_then(serde_json::Value::as_str)
            .ok_or(MessageError::MissingField("dob"))?;
        DateTime::parse_from_rfc3339(dob)
            .map_err(|e| MessageError::InvalidDob(format!("{dob}: {e}")))?;

        Ok(Self {
            action,
            dob: dob.to_string(),
        })
    }

    /// Parsed creation time.
    ///
    /// # Errors
    ///
    /// Returns error if `dob` is not RFC 3339.
    pub fn born_at(&self) -> Result<DateTime<FixedOffset>, MessageError> {
        DateTime::parse_from_rfc3339(&self.dob)
            .map_err(|e| MessageError::InvalidDob(format!("{}: {e}", self.dob)))
    }

    /// Milliseconds between creation and `now`.
    ///
    /// # Errors
    ///
    /// Returns error if `dob` is not RFC 3339.
    pub fn age_ms<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<i64, MessageError> {
        let born = self.born_at()?;
        Ok(now.fixed_offset().signed_duration_since(born).num_milliseconds())
    }
}

/// Format a timestamp as ISO 8601 with millisecond precision.
///
/// UTC renders as `Z`, any other zone as a numeric offset.
#[must_use]
pub fn format_dob<Tz>(dob: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    dob.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// zigbee2mqtt binary state body, used for `/get` requests, state reports
/// and `/set` commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryStatePayload {
    /// `ON`, `OFF`, `TOGGLE`, or empty for a request
    pub state: String,
}

impl BinaryStatePayload {
    /// Blank state request for a device's `/get` topic.
    #[must_use]
    pub fn query() -> Self {
        Self {
            state: String::new(),
        }
    }

    /// Command for a device's `/set` topic.
    #[must_use]
    pub fn command(target: TargetState) -> Self {
        Self {
            state: target.as_str().to_string(),
        }
    }

    /// Serialize to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(self).map_err(|e| MessageError::Serialize(e.to_string()))
    }

    /// Decode a device state report.
    ///
    /// A report that is not JSON, lacks `state`, or carries an unexpected value
    /// is [`DeviceState::Unknown`].
    #[must_use]
    pub fn device_state(bytes: &[u8]) -> DeviceState {
        serde_json::from_slice::<Self>(bytes)
            .map_or(DeviceState::Unknown, |report| {
                DeviceState::from_reported(&report.state)
            })
    }
}

/// Errors for payload encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialize error: {0}")]
    Deserialize(String),
    /// Payload is not a JSON object
    #[error("expected payload to be an object")]
    NotAnObject,
    /// Required field absent or not a string
    #[error("expected .{0} to be a string")]
    MissingField(&'static str),
    /// Action outside the canonical set
    #[error("invalid action: {0}")]
    InvalidAction(String),
    /// Timestamp not RFC 3339
    #[error("invalid dob: {0}")]
    InvalidDob(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn has_millis_and_offset(dob: &str) -> bool {
        let bytes = dob.as_bytes();
        DateTime::parse_from_rfc3339(dob).is_ok()
            && bytes.len() > 23
            && bytes[19] == b'.'
            && bytes[20..23].iter().all(u8::is_ascii_digit)
            && matches!(bytes[23], b'Z' | b'+' | b'-')
    }

    #[test]
    fn envelope_wire_format() {
        let dob = Utc.with_ymd_and_hms(2024, 3, 9, 18, 4, 5).unwrap();
        let payload = ActionPayload::at(MaisonAction::Up, &dob);

        assert_eq!(
            String::from_utf8(payload.to_json().unwrap()).unwrap(),
            r#"{"action":"up","dob":"2024-03-09T18:04:05.000Z"}"#
        );
    }

    #[test]
    fn dob_keeps_offset() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let dob = offset.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        assert_eq!(format_dob(&dob), "2024-01-02T03:04:05.000-05:00");
        assert!(has_millis_and_offset(&ActionPayload::new(MaisonAction::Main).dob));
    }

    #[test]
    fn strict_envelope_parse() {
        let parsed =
            ActionPayload::parse(br#"{"action":"dots_double","dob":"2024-03-09T18:04:05.120Z"}"#)
                .unwrap();
        assert_eq!(parsed.action, MaisonAction::DotsDouble);
        assert_eq!(
            ActionPayload::parse(br#"{"action":"dots_long","dob":"2024-03-09T18:04:05.120Z"}"#)
                .unwrap()
                .action,
            MaisonAction::DotsLong
        );

        assert_eq!(
            ActionPayload::parse(br#"["main"]"#),
            Err(MessageError::NotAnObject)
        );
        assert_eq!(
            ActionPayload::parse(br#"{"action":"main"}"#),
            Err(MessageError::MissingField("dob"))
        );
        assert_eq!(
            ActionPayload::parse(br#"{"action":"volume_up","dob":"2024-03-09T18:04:05.120Z"}"#),
            Err(MessageError::InvalidAction("volume_up".to_string()))
        );
        assert!(matches!(
            ActionPayload::parse(br#"{"action":"main","dob":"yesterday"}"#),
            Err(MessageError::InvalidDob(_))
        ));
    }

    #[test]
    fn envelope_age() {
        let dob = Utc.with_ymd_and_hms(2024, 3, 9, 18, 4, 5).unwrap();
        let payload = ActionPayload::at(MaisonAction::Next, &dob);
        let now = dob + chrono::Duration::milliseconds(250);

        assert_eq!(payload.age_ms(&now).unwrap(), 250);
    }

    #[test]
    fn state_bodies() {
        assert_eq!(
            BinaryStatePayload::query().to_json().unwrap(),
            br#"{"state":""}"#.to_vec()
        );
        assert_eq!(
            BinaryStatePayload::command(TargetState::Off).to_json().unwrap(),
            br#"{"state":"OFF"}"#.to_vec()
        );
    }

    #[test]
    fn state_report_decoding() {
        assert_eq!(
            BinaryStatePayload::device_state(br#"{"state":"ON","brightness":254}"#),
            DeviceState::On
        );
        assert_eq!(
            BinaryStatePayload::device_state(br#"{"state":"OFF"}"#),
            DeviceState::Off
        );
        assert_eq!(
            BinaryStatePayload::device_state(br#"{"linkquality":80}"#),
            DeviceState::Unknown
        );
        assert_eq!(BinaryStatePayload::device_state(b"garbage"), DeviceState::Unknown);
    }

    #[test]
    fn remote_payload() {
        let payload = RemoteActionPayload::from_json(br#"{"action":"volume_up"}"#).unwrap();
        assert_eq!(payload.action, "volume_up");
        assert!(RemoteActionPayload::from_json(b"toggle").is_err());
    }
}
