//! Controller clock (`313F`).

use chrono::{NaiveDateTime, TimeDelta};
use serde_json::{Map, Value, json};

use evohub_domain::command::Command;
use evohub_domain::error::EvohubError;
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::Payload;

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;

#[derive(Debug, Default)]
pub struct DateTimeSync {
    datetime: Option<NaiveDateTime>,
}

impl DateTimeSync {
    /// The controller's local time as last reported; `None` until first sync.
    #[must_use]
    pub fn datetime(&self) -> Option<NaiveDateTime> {
        self.datetime
    }
}

impl Capability for DateTimeSync {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::DateTime
    }

    fn codes(&self) -> &'static [Code] {
        &[Code::DATETIME]
    }

    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if let Payload::DateTime { datetime } = msg.payload()
            && msg.src() == ctx.controller
            && msg.carries_state()
        {
            self.datetime = Some(*datetime);
        }
        Ok(())
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        vec![Planned::status(Command::get_system_time(controller)).every(TimeDelta::hours(1))]
    }

    fn status(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("datetime".into(), json!(self.datetime));
    }
}
