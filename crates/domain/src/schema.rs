//! Explicit system topology, as supplied by configuration rather than
//! learned from traffic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{DeviceId, ZoneIdx};
use crate::zone::ZoneType;

/// Controller family. Decides which capabilities a system carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemProfile {
    Evohome,
    Programmer,
    Chronotherm,
    Hometronics,
    Sundial,
    Generic,
}

impl SystemProfile {
    /// Default profile for a controller address.
    #[must_use]
    pub fn for_controller(controller: DeviceId) -> Self {
        match controller.device_type() {
            23 => Self::Programmer,
            12 => Self::Sundial,
            _ => Self::Evohome,
        }
    }
}

impl fmt::Display for SystemProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Evohome => "evohome",
            Self::Programmer => "programmer",
            Self::Chronotherm => "chronotherm",
            Self::Hometronics => "hometronics",
            Self::Sundial => "sundial",
            Self::Generic => "generic",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhwSchema {
    #[serde(default)]
    pub sensor: Option<DeviceId>,
    #[serde(default)]
    pub dhw_valve: Option<DeviceId>,
    #[serde(default)]
    pub htg_valve: Option<DeviceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSchema {
    #[serde(default)]
    pub zone_type: Option<ZoneType>,
    #[serde(default)]
    pub sensor: Option<DeviceId>,
    #[serde(default)]
    pub actuators: Vec<DeviceId>,
}

/// Known topology of one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSchema {
    pub controller: DeviceId,
    #[serde(default)]
    pub profile: Option<SystemProfile>,
    #[serde(default)]
    pub htg_control: Option<DeviceId>,
    #[serde(default)]
    pub dhw: Option<DhwSchema>,
    #[serde(default)]
    pub zones: BTreeMap<ZoneIdx, ZoneSchema>,
}

impl SystemSchema {
    #[must_use]
    pub fn new(controller: DeviceId) -> Self {
        Self {
            controller,
            profile: None,
            htg_control: None,
            dhw: None,
            zones: BTreeMap::new(),
        }
    }

    /// The configured profile, or the default for the controller type.
    #[must_use]
    pub fn profile(&self) -> SystemProfile {
        self.profile
            .unwrap_or_else(|| SystemProfile::for_controller(self.controller))
    }
}
