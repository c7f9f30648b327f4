//! Message: one observed (or to-be-sent) protocol exchange.
//!
//! Messages are immutable once built: all derived state is rebuilt from the
//! stream, never by editing a stored message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::DeviceId;
use crate::payload::Payload;
use crate::time::Timestamp;

/// A four-hex-digit command identifier (e.g. `30C9`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code([u8; 4]);

impl Code {
    pub const ZONE_NAME: Self = Self(*b"0004");
    pub const ZONE_LIST: Self = Self(*b"0005");
    pub const RELAY_DEMAND: Self = Self(*b"0008");
    pub const RELAY_FAILSAFE: Self = Self(*b"0009");
    pub const ZONE_CONFIG: Self = Self(*b"000A");
    pub const DEVICE_LIST: Self = Self(*b"000C");
    pub const LANGUAGE: Self = Self(*b"0100");
    pub const FAULT_LOG: Self = Self(*b"0418");
    pub const DHW_PARAMS: Self = Self(*b"10A0");
    pub const TPI_PARAMS: Self = Self(*b"1100");
    pub const DHW_TEMP: Self = Self(*b"1260");
    pub const WINDOW_STATE: Self = Self(*b"12B0");
    pub const SYSTEM_SYNC: Self = Self(*b"1F09");
    pub const DHW_MODE: Self = Self(*b"1F41");
    pub const SETPOINT: Self = Self(*b"2309");
    pub const ZONE_MODE: Self = Self(*b"2349");
    pub const SYSTEM_MODE: Self = Self(*b"2E04");
    pub const TEMPERATURE: Self = Self(*b"30C9");
    pub const DATETIME: Self = Self(*b"313F");
    pub const HEAT_DEMAND: Self = Self(*b"3150");
    pub const OPENTHERM: Self = Self(*b"3220");
    pub const ACTUATOR_SYNC: Self = Self(*b"3B00");
    pub const ACTUATOR_STATE: Self = Self(*b"3EF0");
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", char::from(b))?;
        }
        Ok(())
    }
}

impl FromStr for Code {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ValidationError::InvalidCode(s.to_string()))?;
        if !bytes.iter().all(u8::is_ascii_hexdigit) {
            return Err(ValidationError::InvalidCode(s.to_string()));
        }
        Ok(Self(bytes.map(|b| b.to_ascii_uppercase())))
    }
}

impl TryFrom<String> for Code {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Code> for String {
    fn from(value: Code) -> Self {
        value.to_string()
    }
}

/// Direction of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Request (`RQ`).
    #[serde(rename = "RQ")]
    Request,
    /// Response (`RP`).
    #[serde(rename = "RP")]
    Response,
    /// Information (` I`), usually a broadcast.
    #[serde(rename = "I")]
    Information,
    /// Write (` W`).
    #[serde(rename = "W")]
    Write,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "RQ",
            Self::Response => "RP",
            Self::Information => " I",
            Self::Write => " W",
        })
    }
}

impl FromStr for Verb {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "RQ" => Ok(Self::Request),
            "RP" => Ok(Self::Response),
            "I" => Ok(Self::Information),
            "W" => Ok(Self::Write),
            _ => Err(ValidationError::InvalidVerb(s.to_string())),
        }
    }
}

/// An immutable unit of protocol traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    code: Code,
    verb: Verb,
    src: DeviceId,
    /// `None` for broadcast (`--:------`) destinations.
    #[serde(default)]
    dst: Option<DeviceId>,
    #[serde(default)]
    payload: Payload,
    timestamp: Timestamp,
}

impl Message {
    /// Create a builder for constructing a [`Message`].
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    #[must_use]
    pub fn src(&self) -> DeviceId {
        self.src
    }

    #[must_use]
    pub fn dst(&self) -> Option<DeviceId> {
        self.dst
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whether the payload is an ordered sequence of per-zone records.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.payload.is_array()
    }

    /// Whether this is an `I` or `RP`: the verbs that carry state.
    #[must_use]
    pub fn carries_state(&self) -> bool {
        matches!(self.verb, Verb::Information | Verb::Response)
    }

    /// Whether `device` is the source or the destination.
    #[must_use]
    pub fn involves(&self, device: DeviceId) -> bool {
        self.src == device || self.dst == Some(device)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dst = self
            .dst
            .map_or_else(|| "--:------".to_string(), |d| d.to_string());
        write!(f, "{} {} {} {}", self.verb, self.src, dst, self.code)
    }
}

/// Step-by-step builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    code: Option<Code>,
    verb: Option<Verb>,
    src: Option<DeviceId>,
    dst: Option<DeviceId>,
    payload: Payload,
    timestamp: Option<Timestamp>,
}

impl MessageBuilder {
    #[must_use]
    pub fn code(mut self, code: Code) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    #[must_use]
    pub fn src(mut self, src: DeviceId) -> Self {
        self.src = Some(src);
        self
    }

    #[must_use]
    pub fn dst(mut self, dst: DeviceId) -> Self {
        self.dst = Some(dst);
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Consume the builder and return a [`Message`].
    ///
    /// The verb defaults to `I` and the timestamp to now.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCode`] if no code was given and
    /// [`ValidationError::InvalidDeviceId`] if no source was given.
    pub fn build(self) -> Result<Message, ValidationError> {
        Ok(Message {
            code: self
                .code
                .ok_or_else(|| ValidationError::InvalidCode(String::new()))?,
            verb: self.verb.unwrap_or(Verb::Information),
            src: self
                .src
                .ok_or_else(|| ValidationError::InvalidDeviceId(String::new()))?,
            dst: self.dst,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or_else(crate::time::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ZoneTemperature;
    use crate::id::ZoneIdx;

    fn ctl() -> DeviceId {
        "01:145038".parse().unwrap()
    }

    #[test]
    fn should_parse_and_normalise_codes() {
        assert_eq!("30c9".parse::<Code>().unwrap(), Code::TEMPERATURE);
        assert_eq!(Code::ACTUATOR_SYNC.to_string(), "3B00");
        assert!("30C".parse::<Code>().is_err());
        assert!("30CZ".parse::<Code>().is_err());
    }

    #[test]
    fn should_parse_verbs_with_padding() {
        assert_eq!(" I".parse::<Verb>().unwrap(), Verb::Information);
        assert_eq!("RP".parse::<Verb>().unwrap(), Verb::Response);
        assert!("XX".parse::<Verb>().is_err());
    }

    #[test]
    fn should_require_code_and_source() {
        assert!(Message::builder().src(ctl()).build().is_err());
        assert!(Message::builder().code(Code::SYSTEM_SYNC).build().is_err());
    }

    #[test]
    fn should_report_array_payloads() {
        let msg = Message::builder()
            .code(Code::TEMPERATURE)
            .src(ctl())
            .payload(Payload::ZoneTemperatures {
                zones: vec![ZoneTemperature::new(ZoneIdx::Zone(0), Some(19.0))],
            })
            .build()
            .unwrap();
        assert!(msg.is_array());
        assert!(msg.carries_state());
        assert!(msg.involves(ctl()));
    }

    #[test]
    fn should_display_like_a_packet_header() {
        let msg = Message::builder()
            .code(Code::ACTUATOR_STATE)
            .verb(Verb::Request)
            .src(ctl())
            .dst("13:237335".parse().unwrap())
            .build()
            .unwrap();
        assert_eq!(msg.to_string(), "RQ 01:145038 13:237335 3EF0");
    }

    #[test]
    fn should_deserialize_message_from_json() {
        let json = r#"{
            "code": "1F09",
            "verb": "I",
            "src": "01:145038",
            "payload": {"type": "system_sync", "remaining_seconds": 300.0},
            "timestamp": "2024-01-01T12:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.code(), Code::SYSTEM_SYNC);
        assert_eq!(msg.dst(), None);
        assert_eq!(msg.payload().remaining_seconds(), Some(300.0));
    }
}
