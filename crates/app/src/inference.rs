//! Relationship inference: bindings the protocol never announces, learned
//! from traffic patterns.
//!
//! Every finder here is a pure function of the evidence it is given: it
//! reports what *would* be bound, and the system decides whether to bind
//! (eavesdropping on) or only check consistency (eavesdropping off).
//! Finding nothing, or more than one candidate, is not an error.

pub mod dhw_sensor;
pub mod heating_control;
pub mod zone_sensor;

use evohub_domain::message::Code;

pub use dhw_sensor::find_dhw_sensor;
pub use heating_control::find_htg_control;
pub use zone_sensor::{SensorMatch, ZoneSensorEvidence, find_zone_sensors};

/// Codes that feed the inference engine.
pub const INFERENCE_CODES: [Code; 5] = [
    Code::TEMPERATURE,
    Code::DHW_PARAMS,
    Code::OPENTHERM,
    Code::ACTUATOR_STATE,
    Code::ACTUATOR_SYNC,
];
