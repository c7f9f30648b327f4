//! Controller display language (`0100`).

use serde_json::{Map, Value, json};

use evohub_domain::command::Command;
use evohub_domain::error::EvohubError;
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::Payload;

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;

#[derive(Debug, Default)]
pub struct Language {
    language: Option<String>,
}

impl Language {
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}

impl Capability for Language {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Language
    }

    fn codes(&self) -> &'static [Code] {
        &[Code::LANGUAGE]
    }

    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if let Payload::Language { language } = msg.payload()
            && msg.src() == ctx.controller
        {
            self.language = Some(language.clone());
        }
        Ok(())
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        vec![Planned::params(Command::get_system_language(controller))]
    }

    fn params(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("language".into(), json!(self.language));
    }
}
