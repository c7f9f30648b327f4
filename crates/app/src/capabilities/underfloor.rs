//! Underfloor heating hubs attached to the controller.

use serde_json::{Map, Value, json};

use evohub_domain::device::DeviceKind;
use evohub_domain::error::EvohubError;
use evohub_domain::message::{Code, Message};

use super::{Capability, CapabilityKind, Context};

/// Read-only view over the device pool; keeps no state of its own.
#[derive(Debug, Default)]
pub struct Underfloor;

impl Capability for Underfloor {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Underfloor
    }

    fn codes(&self) -> &'static [Code] {
        &[]
    }

    fn handle_message(
        &mut self,
        _ctx: &Context<'_>,
        _msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        Ok(())
    }

    fn schema(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        let hubs: Vec<_> = ctx
            .pool
            .attached_to(ctx.controller)
            .into_iter()
            .filter(|d| d.kind() == DeviceKind::UfhHub)
            .map(|d| d.id())
            .collect();
        out.insert("ufh_controllers".into(), json!(hubs));
    }
}
