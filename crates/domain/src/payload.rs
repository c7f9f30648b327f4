//! Decoded payloads.
//!
//! Field decoding is done upstream by the transport layer; the engine only
//! consumes these already-typed records. Anything it does not interpret
//! arrives as [`Payload::Raw`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::id::{DeviceId, DomainId, ZoneIdx};
use crate::time::Timestamp;
use crate::zone::ZoneType;

/// The decoded body of a [`Message`](crate::message::Message).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    /// `30C9` array from a controller: one record per zone.
    ZoneTemperatures { zones: Vec<ZoneTemperature> },
    /// `30C9` from a sensor, or `1260` from a DHW sensor.
    Temperature { temperature: Option<f64> },
    /// `2309` array from a controller.
    ZoneSetpoints { zones: Vec<ZoneSetpoint> },
    /// `000A` array from a controller.
    ZoneConfigs { zones: Vec<ZoneConfig> },
    /// `0005` reply: which zones exist for a zone type.
    ZoneList {
        zone_type: ZoneType,
        zones: Vec<ZoneIdx>,
    },
    /// `1F09` system sync.
    SystemSync { remaining_seconds: f64 },
    /// `0418` fault log entry.
    FaultLogEntry(FaultLogEntry),
    /// `313F` controller clock.
    DateTime { datetime: NaiveDateTime },
    /// `0100` language.
    Language { language: String },
    /// `2E04` system mode.
    SystemMode {
        system_mode: SystemMode,
        until: Option<Timestamp>,
    },
    /// `1100` TPI parameters.
    TpiParams(TpiParams),
    /// `3150` heat demand of one domain.
    HeatDemand { domain_id: DomainId, heat_demand: f64 },
    /// `0008` relay demand of one domain.
    RelayDemand {
        domain_id: DomainId,
        relay_demand: f64,
    },
    /// `0009` relay failsafe of one domain.
    RelayFailsafe {
        domain_id: DomainId,
        failsafe_enabled: bool,
    },
    /// `10A0` DHW parameters.
    DhwParams(DhwParams),
    /// `1F41` DHW mode.
    DhwMode {
        active: Option<bool>,
        mode: String,
        until: Option<Timestamp>,
    },
    /// Undecoded hex, e.g. the body of an outbound request.
    Raw { hex: String },
}

impl Payload {
    /// Whether this payload is a sequence of per-zone records.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Self::ZoneTemperatures { .. } | Self::ZoneSetpoints { .. } | Self::ZoneConfigs { .. }
        )
    }

    #[must_use]
    pub fn zone_temperatures(&self) -> Option<&[ZoneTemperature]> {
        match self {
            Self::ZoneTemperatures { zones } => Some(zones),
            _ => None,
        }
    }

    /// A single temperature reading (`None` if absent or not a reading).
    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        match self {
            Self::Temperature { temperature } => *temperature,
            _ => None,
        }
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<f64> {
        match self {
            Self::SystemSync { remaining_seconds } => Some(*remaining_seconds),
            _ => None,
        }
    }

    /// The domain a per-domain payload refers to.
    #[must_use]
    pub fn domain_id(&self) -> Option<DomainId> {
        match self {
            Self::HeatDemand { domain_id, .. }
            | Self::RelayDemand { domain_id, .. }
            | Self::RelayFailsafe { domain_id, .. } => Some(*domain_id),
            _ => None,
        }
    }
}

/// One zone's entry in a `30C9` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneTemperature {
    pub zone_idx: ZoneIdx,
    pub temperature: Option<f64>,
}

impl ZoneTemperature {
    #[must_use]
    pub fn new(zone_idx: ZoneIdx, temperature: Option<f64>) -> Self {
        Self {
            zone_idx,
            temperature,
        }
    }
}

/// One zone's entry in a `2309` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSetpoint {
    pub zone_idx: ZoneIdx,
    pub setpoint: Option<f64>,
}

/// One zone's entry in a `000A` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zone_idx: ZoneIdx,
    pub min_temp: f64,
    pub max_temp: f64,
    #[serde(default)]
    pub local_override: bool,
    #[serde(default)]
    pub openwindow_function: bool,
}

/// A `0418` fault log slot; `fault` is `None` for an empty slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultLogEntry {
    pub log_idx: u8,
    pub fault: Option<Fault>,
}

/// A recorded fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub timestamp: NaiveDateTime,
    /// `fault` or `restore`.
    pub fault_state: String,
    pub fault_type: String,
    pub domain_idx: String,
    pub device_class: String,
    pub device_id: Option<DeviceId>,
}

/// Controller operating mode (`2E04`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    Auto,
    HeatOff,
    EcoBoost,
    Away,
    DayOff,
    DayOffEco,
    AutoWithReset,
    Custom,
}

impl SystemMode {
    /// Wire value of this mode.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 0x00,
            Self::HeatOff => 0x01,
            Self::EcoBoost => 0x02,
            Self::Away => 0x03,
            Self::DayOff => 0x04,
            Self::DayOffEco => 0x05,
            Self::AutoWithReset => 0x06,
            Self::Custom => 0x07,
        }
    }

    /// Whether the mode may carry an `until` time.
    #[must_use]
    pub fn is_temporary(self) -> bool {
        !matches!(self, Self::Auto | Self::HeatOff | Self::AutoWithReset)
    }
}

/// Time-proportional-integral relay parameters (`1100`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TpiParams {
    pub cycle_rate: u8,
    pub min_on_time: f64,
    pub min_off_time: f64,
    pub proportional_band_width: Option<f64>,
}

/// Stored hot water parameters (`10A0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DhwParams {
    pub setpoint: f64,
    pub overrun: u8,
    pub differential: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_default_to_empty() {
        assert_eq!(Payload::default(), Payload::Empty);
        assert!(!Payload::Empty.is_array());
    }

    #[test]
    fn should_expose_domain_of_per_domain_payloads() {
        let p = Payload::RelayDemand {
            domain_id: DomainId::HEATING_CONTROL,
            relay_demand: 0.5,
        };
        assert_eq!(p.domain_id(), Some(DomainId::HEATING_CONTROL));
        assert_eq!(Payload::Empty.domain_id(), None);
    }

    #[test]
    fn should_tag_payloads_by_type_in_json() {
        let p = Payload::Temperature {
            temperature: Some(20.5),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "temperature");
        assert_eq!(json["temperature"], 20.5);
    }

    #[test]
    fn should_deserialize_fault_log_entry() {
        let json = r#"{"type": "fault_log_entry", "log_idx": 0, "fault": null}"#;
        let p: Payload = serde_json::from_str(json).unwrap();
        assert_eq!(
            p,
            Payload::FaultLogEntry(FaultLogEntry {
                log_idx: 0,
                fault: None
            })
        );
    }

    #[test]
    fn should_map_system_modes_to_wire_values() {
        assert_eq!(SystemMode::Auto.code(), 0x00);
        assert_eq!(SystemMode::AutoWithReset.code(), 0x06);
    }
}
