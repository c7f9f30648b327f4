//! Which sensor belongs to the hot water circuit.

use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message, Verb};

const DHW_SENSOR: u8 = 7;

/// The DHW sensor evidenced by a `10A0` reply from the controller.
///
/// Only the reply is trusted: the request comes from the sensor and does not
/// say which controller it belongs to.
#[must_use]
pub fn find_dhw_sensor(controller: DeviceId, msg: &Message) -> Option<DeviceId> {
    if msg.code() != Code::DHW_PARAMS || msg.verb() != Verb::Response || msg.src() != controller {
        return None;
    }
    msg.dst().filter(|dst| dst.device_type() == DHW_SENSOR)
}
