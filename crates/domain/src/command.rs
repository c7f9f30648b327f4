//! Outbound commands.
//!
//! A [`Command`] is the request half of an exchange: the engine builds one,
//! hands it to a sink and, for `RQ`s, may wait for the matching `RP`.
//! Payloads are kept as upper-case hex; encoding beyond the few fields the
//! engine sets itself belongs to the transport.

use std::fmt;

use chrono::{Datelike, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::id::{CommandId, DeviceId, ZoneIdx};
use crate::message::{Code, Message, Verb};
use crate::payload::{Payload, SystemMode};
use crate::time::Timestamp;
use crate::zone::ZoneType;

/// Device classes that can be asked for with `000C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    ZoneActuators,
    ZoneSensor,
    DhwSensor,
    DhwValve,
    HtgValve,
    HtgControl,
}

impl DeviceRole {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::ZoneActuators => 0x00,
            Self::ZoneSensor => 0x04,
            Self::DhwSensor => 0x0D,
            Self::DhwValve => 0x0E,
            Self::HtgValve => 0x0F,
            Self::HtgControl => 0x10,
        }
    }
}

/// Transmit priority hint for the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Default,
    High,
    Asap,
}

/// How a command should be submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub priority: Priority,
    /// Minimum interval between two submissions of the same command.
    pub period: Option<TimeDelta>,
}

impl SendOptions {
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_period(mut self, period: TimeDelta) -> Self {
        self.period = Some(period);
        self
    }
}

/// Identity of a command for re-issue gating: two commands with the same
/// key are the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub verb: Verb,
    pub code: Code,
    pub dst: DeviceId,
    pub payload: String,
}

/// A request addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    id: CommandId,
    verb: Verb,
    code: Code,
    dst: DeviceId,
    payload: String,
}

impl Command {
    /// Build a command with a fresh id.
    #[must_use]
    pub fn new(verb: Verb, code: Code, dst: DeviceId, payload: impl Into<String>) -> Self {
        Self {
            id: CommandId::new(),
            verb,
            code,
            dst,
            payload: payload.into().to_ascii_uppercase(),
        }
    }

    /// The same request under a fresh id.
    #[must_use]
    pub fn renewed(&self) -> Self {
        Self {
            id: CommandId::new(),
            ..self.clone()
        }
    }

    fn request(code: Code, dst: DeviceId, payload: impl Into<String>) -> Self {
        Self::new(Verb::Request, code, dst, payload)
    }

    #[must_use]
    pub fn id(&self) -> CommandId {
        self.id
    }

    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn dst(&self) -> DeviceId {
        self.dst
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub fn key(&self) -> CommandKey {
        CommandKey {
            verb: self.verb,
            code: self.code,
            dst: self.dst,
            payload: self.payload.clone(),
        }
    }

    /// Whether the destination answers this command with an `RP`.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.verb == Verb::Request
    }

    /// Log index requested by a `0418` command.
    #[must_use]
    pub fn fault_log_idx(&self) -> Option<u8> {
        if self.code != Code::FAULT_LOG {
            return None;
        }
        let idx = self.payload.get(4..6)?;
        u8::from_str_radix(idx, 16).ok()
    }

    /// Whether `msg` is the reply to this command.
    #[must_use]
    pub fn is_answered_by(&self, msg: &Message) -> bool {
        if !self.expects_reply()
            || msg.verb() != Verb::Response
            || msg.code() != self.code
            || msg.src() != self.dst
        {
            return false;
        }
        match (self.fault_log_idx(), msg.payload()) {
            (Some(idx), Payload::FaultLogEntry(entry)) => entry.log_idx == idx,
            (Some(_), _) => false,
            (None, _) => true,
        }
    }

    /// `0005`: list the zones of one type.
    #[must_use]
    pub fn get_zone_list(ctl: DeviceId, zone_type: ZoneType) -> Self {
        Self::request(Code::ZONE_LIST, ctl, format!("00{:02X}", zone_type.code()))
    }

    /// `000C`: list the devices holding `role` for a zone (`0` for the system).
    #[must_use]
    pub fn get_device_list(ctl: DeviceId, idx: u8, role: DeviceRole) -> Self {
        Self::request(
            Code::DEVICE_LIST,
            ctl,
            format!("{idx:02X}{:02X}", role.code()),
        )
    }

    #[must_use]
    pub fn get_system_mode(ctl: DeviceId) -> Self {
        Self::request(Code::SYSTEM_MODE, ctl, "FF")
    }

    /// `2E04` write. `until` is dropped for modes that are not temporary.
    #[must_use]
    pub fn set_system_mode(ctl: DeviceId, mode: SystemMode, until: Option<Timestamp>) -> Self {
        let until = until.filter(|_| mode.is_temporary());
        let payload = match until {
            Some(dt) => format!(
                "{:02X}{:02X}{:02X}{:02X}{:02X}{:04X}01",
                mode.code(),
                dt.minute(),
                dt.hour(),
                dt.day(),
                dt.month(),
                dt.year(),
            ),
            None => format!("{:02X}FFFFFFFFFFFF00", mode.code()),
        };
        Self::new(Verb::Write, Code::SYSTEM_MODE, ctl, payload)
    }

    #[must_use]
    pub fn get_system_time(ctl: DeviceId) -> Self {
        Self::request(Code::DATETIME, ctl, "00")
    }

    #[must_use]
    pub fn get_system_language(ctl: DeviceId) -> Self {
        Self::request(Code::LANGUAGE, ctl, "00")
    }

    #[must_use]
    pub fn get_tpi_params(ctl: DeviceId) -> Self {
        Self::request(Code::TPI_PARAMS, ctl, "FC")
    }

    #[must_use]
    pub fn get_system_sync(ctl: DeviceId) -> Self {
        Self::request(Code::SYSTEM_SYNC, ctl, "00")
    }

    #[must_use]
    pub fn get_fault_log_entry(ctl: DeviceId, log_idx: u8) -> Self {
        Self::request(Code::FAULT_LOG, ctl, format!("0000{log_idx:02X}"))
    }

    #[must_use]
    pub fn get_zone_config(ctl: DeviceId, idx: ZoneIdx) -> Self {
        Self::request(Code::ZONE_CONFIG, ctl, idx.to_string())
    }

    #[must_use]
    pub fn get_zone_name(ctl: DeviceId, idx: ZoneIdx) -> Self {
        Self::request(Code::ZONE_NAME, ctl, format!("{idx}00"))
    }

    #[must_use]
    pub fn get_zone_mode(ctl: DeviceId, idx: ZoneIdx) -> Self {
        Self::request(Code::ZONE_MODE, ctl, idx.to_string())
    }

    #[must_use]
    pub fn get_window_state(ctl: DeviceId, idx: ZoneIdx) -> Self {
        Self::request(Code::WINDOW_STATE, ctl, idx.to_string())
    }

    #[must_use]
    pub fn get_dhw_params(ctl: DeviceId) -> Self {
        Self::request(Code::DHW_PARAMS, ctl, "00")
    }

    #[must_use]
    pub fn get_dhw_temp(ctl: DeviceId) -> Self {
        Self::request(Code::DHW_TEMP, ctl, "00")
    }

    #[must_use]
    pub fn get_dhw_mode(ctl: DeviceId) -> Self {
        Self::request(Code::DHW_MODE, ctl, "00")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.verb, self.dst, self.code, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::FaultLogEntry;
    use chrono::{TimeZone, Utc};

    fn ctl() -> DeviceId {
        "01:145038".parse().unwrap()
    }

    #[test]
    fn should_encode_zone_and_device_probes() {
        assert_eq!(Command::get_zone_list(ctl(), ZoneType::Ele).payload(), "0011");
        assert_eq!(
            Command::get_device_list(ctl(), 0, DeviceRole::DhwSensor).payload(),
            "000D"
        );
        assert_eq!(
            Command::get_device_list(ctl(), 0x0A, DeviceRole::ZoneSensor).payload(),
            "0A04"
        );
    }

    #[test]
    fn should_encode_temporary_system_mode_with_until() {
        let until = Utc.with_ymd_and_hms(2024, 3, 15, 18, 30, 0).unwrap();
        let cmd = Command::set_system_mode(ctl(), SystemMode::Away, Some(until));
        assert_eq!(cmd.verb(), Verb::Write);
        assert_eq!(cmd.payload(), "031E120F0307E801");
        assert!(!cmd.expects_reply());
    }

    #[test]
    fn should_drop_until_for_permanent_modes() {
        let until = Utc.with_ymd_and_hms(2024, 3, 15, 18, 30, 0).unwrap();
        let cmd = Command::set_system_mode(ctl(), SystemMode::Auto, Some(until));
        assert_eq!(cmd.payload(), "00FFFFFFFFFFFF00");
    }

    #[test]
    fn should_share_key_between_identical_requests() {
        let a = Command::get_system_mode(ctl());
        let b = Command::get_system_mode(ctl());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn should_match_fault_log_reply_by_index() {
        let cmd = Command::get_fault_log_entry(ctl(), 3);
        assert_eq!(cmd.fault_log_idx(), Some(3));

        let reply = |log_idx| {
            Message::builder()
                .code(Code::FAULT_LOG)
                .verb(Verb::Response)
                .src(ctl())
                .payload(Payload::FaultLogEntry(FaultLogEntry {
                    log_idx,
                    fault: None,
                }))
                .build()
                .unwrap()
        };
        assert!(cmd.is_answered_by(&reply(3)));
        assert!(!cmd.is_answered_by(&reply(4)));
    }

    #[test]
    fn should_not_match_reply_from_another_device() {
        let cmd = Command::get_system_time(ctl());
        let msg = Message::builder()
            .code(Code::DATETIME)
            .verb(Verb::Response)
            .src("01:000001".parse().unwrap())
            .build()
            .unwrap();
        assert!(!cmd.is_answered_by(&msg));
    }
}
