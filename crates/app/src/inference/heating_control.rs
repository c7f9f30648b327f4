//! Which relay calls the heat source.

use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message, Verb};

const OPENTHERM_BRIDGE: u8 = 10;
const RELAY: u8 = 13;

/// The heating-control relay evidenced by `msg`, if any.
///
/// Evidence, most reliable first:
/// 1. `3220` RQ from the controller to an OpenTherm bridge.
/// 2. `3EF0` RQ from the controller to an OpenTherm bridge or a relay.
/// 3. `3B00` I from the controller, when the previous `3B00` I came from a
///    relay: that relay.
#[must_use]
pub fn find_htg_control(
    controller: DeviceId,
    msg: &Message,
    prev: Option<&Message>,
) -> Option<DeviceId> {
    if msg.src() != controller {
        return None;
    }
    match (msg.code(), msg.verb()) {
        (Code::OPENTHERM, Verb::Request) => msg
            .dst()
            .filter(|dst| dst.device_type() == OPENTHERM_BRIDGE),
        (Code::ACTUATOR_STATE, Verb::Request) => msg
            .dst()
            .filter(|dst| matches!(dst.device_type(), OPENTHERM_BRIDGE | RELAY)),
        (Code::ACTUATOR_SYNC, Verb::Information) => prev
            .filter(|prev| {
                prev.code() == Code::ACTUATOR_SYNC
                    && prev.verb() == Verb::Information
                    && prev.src().device_type() == RELAY
            })
            .map(Message::src),
        _ => None,
    }
}
