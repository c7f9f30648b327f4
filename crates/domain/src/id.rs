//! Identifiers: protocol addresses, zone indexes, domain ids, command ids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl $name {
            /// Generate a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Access the inner UUID.
            #[must_use]
            pub fn as_uuid(self) -> uuid::Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Correlates an outbound [`Command`](crate::command::Command) with its in-flight handle.
    CommandId
);

/// A protocol address: a two-digit device type and a six-digit serial,
/// written `TT:SSSSSS` (e.g. `10:067219`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId {
    device_type: u8,
    serial: u32,
}

impl DeviceId {
    /// Build an address from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDeviceId`] if the type is above 63
    /// or the serial does not fit in six digits.
    pub fn new(device_type: u8, serial: u32) -> Result<Self, ValidationError> {
        if device_type > 63 || serial > 999_999 {
            return Err(ValidationError::InvalidDeviceId(format!(
                "{device_type:02}:{serial:06}"
            )));
        }
        Ok(Self {
            device_type,
            serial,
        })
    }

    /// The two-digit device type (`1` for `01:…`, `13` for `13:…`).
    #[must_use]
    pub fn device_type(self) -> u8 {
        self.device_type
    }

    #[must_use]
    pub fn serial(self) -> u32 {
        self.serial
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:06}", self.device_type, self.serial)
    }
}

impl FromStr for DeviceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidDeviceId(s.to_string());
        let (kind, serial) = s.split_once(':').ok_or_else(invalid)?;
        if kind.len() != 2 || serial.len() != 6 {
            return Err(invalid());
        }
        if !kind.bytes().chain(serial.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let kind = kind.parse().map_err(|_| invalid())?;
        let serial = serial.parse().map_err(|_| invalid())?;
        Self::new(kind, serial).map_err(|_| invalid())
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.to_string()
    }
}

/// Index of a heating zone (`00`..`0F`) or the stored hot water circuit (`HW`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ZoneIdx {
    Zone(u8),
    Hw,
}

impl ZoneIdx {
    /// Highest zone index the protocol can address.
    pub const MAX: u8 = 0x0F;

    /// Wrap a numeric zone index.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidZoneIdx`] above [`Self::MAX`].
    pub fn zone(idx: u8) -> Result<Self, ValidationError> {
        if idx > Self::MAX {
            return Err(ValidationError::InvalidZoneIdx(format!("{idx:02X}")));
        }
        Ok(Self::Zone(idx))
    }

    /// The numeric index, `None` for the DHW circuit.
    #[must_use]
    pub fn as_u8(self) -> Option<u8> {
        match self {
            Self::Zone(idx) => Some(idx),
            Self::Hw => None,
        }
    }
}

impl fmt::Display for ZoneIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zone(idx) => write!(f, "{idx:02X}"),
            Self::Hw => f.write_str("HW"),
        }
    }
}

impl FromStr for ZoneIdx {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("HW") {
            return Ok(Self::Hw);
        }
        if s.len() != 2 {
            return Err(ValidationError::InvalidZoneIdx(s.to_string()));
        }
        let idx = u8::from_str_radix(s, 16)
            .map_err(|_| ValidationError::InvalidZoneIdx(s.to_string()))?;
        Self::zone(idx).map_err(|_| ValidationError::InvalidZoneIdx(s.to_string()))
    }
}

impl TryFrom<String> for ZoneIdx {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ZoneIdx> for String {
    fn from(value: ZoneIdx) -> Self {
        value.to_string()
    }
}

/// A controller-assigned functional tag (`FC` heating, `FA` DHW valve, `F9` heating valve).
///
/// Zone indexes double as domain ids in relay-demand traffic, so any byte is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainId(u8);

impl DomainId {
    pub const HEATING_VALVE: Self = Self(0xF9);
    pub const DHW_VALVE: Self = Self(0xFA);
    pub const HEATING_CONTROL: Self = Self(0xFC);

    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl FromStr for DomainId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 {
            return Err(ValidationError::InvalidDomainId(s.to_string()));
        }
        u8::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ValidationError::InvalidDomainId(s.to_string()))
    }
}

impl TryFrom<String> for DomainId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DomainId> for String {
    fn from(value: DomainId) -> Self {
        value.to_string()
    }
}
