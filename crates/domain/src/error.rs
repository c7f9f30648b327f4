//! Common error types used across the workspace.
//!
//! Each failure has its own typed error, converted into [`EvohubError`]
//! via `#[from]`. Unresolved inference is never an error: it leaves the
//! relevant binding as `None`.

use std::fmt;
use std::time::Duration;

use crate::id::DeviceId;

/// Top-level error for the evohub engine.
#[derive(Debug, thiserror::Error)]
pub enum EvohubError {
    /// A binding conflicts with an existing binding.
    #[error("corrupt state")]
    CorruptState(#[from] CorruptStateError),

    /// An awaited response did not arrive before its deadline.
    #[error("callback expired")]
    ExpiredCallback(#[from] ExpiredCallbackError),

    /// A registry lookup failed.
    #[error("lookup failed")]
    Lookup(#[from] LookupError),

    /// A value violates a domain invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// The outbound sink refused a command.
    #[error("failed to submit command")]
    Send(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The relationship a binding establishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    HeatingControl,
    ZoneSensor,
    DhwSensor,
    DhwValve,
    HeatingValve,
    Parent,
    Controller,
    ZoneType,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HeatingControl => "htg_control",
            Self::ZoneSensor => "sensor",
            Self::DhwSensor => "dhw_sensor",
            Self::DhwValve => "dhw_valve",
            Self::HeatingValve => "htg_valve",
            Self::Parent => "parent",
            Self::Controller => "controller",
            Self::ZoneType => "zone_type",
        })
    }
}

/// An attempt to rebind something that is write-once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{owner} changed {role}: {existing} to {attempted}")]
pub struct CorruptStateError {
    /// The entity whose binding was about to change (system, zone, device).
    pub owner: String,
    pub role: Role,
    pub existing: String,
    pub attempted: String,
}

impl CorruptStateError {
    #[must_use]
    pub fn new(
        owner: impl fmt::Display,
        role: Role,
        existing: impl fmt::Display,
        attempted: impl fmt::Display,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            role,
            existing: existing.to_string(),
            attempted: attempted.to_string(),
        }
    }
}

/// An awaited response that never arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} expired after {deadline:?}")]
pub struct ExpiredCallbackError {
    pub operation: &'static str,
    pub deadline: Duration,
}

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("duplicate controller: {0}")]
    DuplicateController(DeviceId),

    #[error("no system for controller: {0}")]
    UnknownSystem(DeviceId),
}

/// Domain invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    #[error("invalid zone index: {0:?}")]
    InvalidZoneIdx(String),

    #[error("invalid command code: {0:?}")]
    InvalidCode(String),

    #[error("invalid verb: {0:?}")]
    InvalidVerb(String),

    #[error("invalid domain id: {0:?}")]
    InvalidDomainId(String),

    #[error("zone {idx} exceeds the limit of {max_zones} zones")]
    TooManyZones { idx: String, max_zones: u8 },

    #[error("{device} can't be {role}")]
    WrongDeviceKind { device: DeviceId, role: Role },

    #[error("{profile} systems don't support {operation}")]
    UnsupportedOperation {
        operation: &'static str,
        profile: String,
    },
}
