//! Device: anything with a protocol address.
//!
//! A device never owns zones or systems; it only records who it has been
//! bound to. Bindings are write-once: a second bind to the same owner is a
//! no-op, a bind to a different owner is a [`CorruptStateError`].

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CorruptStateError, Role};
use crate::id::{DeviceId, DomainId, ZoneIdx};
use crate::time::Timestamp;

/// Device types able to act as a zone sensor.
const ZONE_SENSOR_TYPES: [u8; 7] = [1, 3, 4, 12, 22, 23, 34];

/// Device types that are controllers (own a system).
const CONTROLLER_TYPES: [u8; 3] = [1, 12, 23];

/// How many readings are kept per device.
pub const READING_HISTORY: usize = 32;

/// Broad functional class, derived from the device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Controller,
    /// Thermostats and room sensors.
    ZoneSensor,
    /// Relay box (`13:`).
    Relay,
    /// OpenTherm bridge / heat source (`10:`).
    OpenThermGateway,
    /// Underfloor heating hub (`02:`).
    UfhHub,
    /// Stored hot water sensor (`07:`).
    DhwSensor,
    Other,
}

impl DeviceKind {
    #[must_use]
    pub fn from_type(device_type: u8) -> Self {
        match device_type {
            t if CONTROLLER_TYPES.contains(&t) => Self::Controller,
            t if ZONE_SENSOR_TYPES.contains(&t) => Self::ZoneSensor,
            13 => Self::Relay,
            10 => Self::OpenThermGateway,
            2 => Self::UfhHub,
            7 => Self::DhwSensor,
            _ => Self::Other,
        }
    }
}

/// Whether the address belongs to a controller-class device.
#[must_use]
pub fn is_controller(id: DeviceId) -> bool {
    CONTROLLER_TYPES.contains(&id.device_type())
}

/// Whether the address belongs to a device that can sense a zone.
///
/// Controllers are included: a controller may be the sensor for one zone.
#[must_use]
pub fn is_zone_sensor_capable(id: DeviceId) -> bool {
    ZONE_SENSOR_TYPES.contains(&id.device_type())
}

/// Who a device is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parent {
    /// The heating-control relay of a system.
    System { controller: DeviceId },
    /// A zone of a system; `idx` is [`ZoneIdx::Hw`] for the DHW circuit.
    Zone { controller: DeviceId, idx: ZoneIdx },
}

impl Parent {
    #[must_use]
    pub fn controller(self) -> DeviceId {
        match self {
            Self::System { controller } | Self::Zone { controller, .. } => controller,
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System { controller } => write!(f, "{controller}"),
            Self::Zone { controller, idx } => write!(f, "{controller}/{idx}"),
        }
    }
}

/// A temperature observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub timestamp: Timestamp,
}

/// A device known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    id: DeviceId,
    kind: DeviceKind,
    controller: Option<DeviceId>,
    parent: Option<Parent>,
    domain_id: Option<DomainId>,
    readings: VecDeque<Reading>,
    last_seen: Option<Timestamp>,
}

impl Device {
    #[must_use]
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            kind: DeviceKind::from_type(id.device_type()),
            controller: None,
            parent: None,
            domain_id: None,
            readings: VecDeque::with_capacity(READING_HISTORY),
            last_seen: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// The controller this device has been attached to, if any.
    #[must_use]
    pub fn controller(&self) -> Option<DeviceId> {
        self.controller
    }

    #[must_use]
    pub fn parent(&self) -> Option<Parent> {
        self.parent
    }

    #[must_use]
    pub fn domain_id(&self) -> Option<DomainId> {
        self.domain_id
    }

    #[must_use]
    pub fn last_seen(&self) -> Option<Timestamp> {
        self.last_seen
    }

    /// The zone this device senses, if it is bound to one of `controller`'s zones.
    #[must_use]
    pub fn zone_idx(&self) -> Option<ZoneIdx> {
        match self.parent {
            Some(Parent::Zone { idx, .. }) => Some(idx),
            _ => None,
        }
    }

    /// Latest reading by time.
    #[must_use]
    pub fn last_reading(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Latest temperature value (`None` if never seen or last value was null).
    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        self.last_reading().and_then(|r| r.temperature)
    }

    /// Readings in chronological order, oldest first.
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Note that the device was heard at `ts`.
    pub fn touch(&mut self, ts: Timestamp) {
        if self.last_seen.is_none_or(|seen| ts > seen) {
            self.last_seen = Some(ts);
        }
    }

    /// Record a temperature reading.
    ///
    /// Readings are kept in time order; a reading at an already-recorded
    /// timestamp is ignored so replays do not change the history.
    pub fn record_reading(&mut self, temperature: Option<f64>, timestamp: Timestamp) {
        self.touch(timestamp);
        if self.readings.iter().any(|r| r.timestamp == timestamp) {
            return;
        }
        let pos = self
            .readings
            .iter()
            .rposition(|r| r.timestamp < timestamp)
            .map_or(0, |p| p + 1);
        self.readings.insert(
            pos,
            Reading {
                temperature,
                timestamp,
            },
        );
        if self.readings.len() > READING_HISTORY {
            self.readings.pop_front();
        }
    }

    /// Attach the device to a controller.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if it is already attached to another one.
    pub fn set_controller(&mut self, controller: DeviceId) -> Result<(), CorruptStateError> {
        match self.controller {
            Some(existing) if existing == controller => Ok(()),
            Some(existing) => Err(CorruptStateError::new(
                self.id,
                Role::Controller,
                existing,
                controller,
            )),
            None => {
                self.controller = Some(controller);
                Ok(())
            }
        }
    }

    /// Check that [`set_parent`](Self::set_parent) would succeed, without binding.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if the device has a different parent or
    /// domain, or belongs to another controller.
    pub fn check_parent(
        &self,
        parent: Parent,
        domain_id: Option<DomainId>,
    ) -> Result<(), CorruptStateError> {
        if let Some(existing) = self.parent
            && existing != parent
        {
            return Err(CorruptStateError::new(self.id, Role::Parent, existing, parent));
        }
        if let (Some(existing), Some(domain)) = (self.domain_id, domain_id)
            && existing != domain
        {
            return Err(CorruptStateError::new(self.id, Role::Parent, existing, domain));
        }
        if let Some(existing) = self.controller
            && existing != parent.controller()
        {
            return Err(CorruptStateError::new(
                self.id,
                Role::Controller,
                existing,
                parent.controller(),
            ));
        }
        Ok(())
    }

    /// Bind the device to a parent (and optionally stamp its domain id).
    ///
    /// Binding also attaches the device to the parent's controller.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] as described in [`check_parent`](Self::check_parent).
    pub fn set_parent(
        &mut self,
        parent: Parent,
        domain_id: Option<DomainId>,
    ) -> Result<(), CorruptStateError> {
        self.check_parent(parent, domain_id)?;
        self.parent = Some(parent);
        if domain_id.is_some() {
            self.domain_id = domain_id;
        }
        self.controller = Some(parent.controller());
        Ok(())
    }
}
