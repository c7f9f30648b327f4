//! System operating mode (`2E04`).

use chrono::TimeDelta;
use serde_json::{Map, Value, json};

use evohub_domain::command::{Command, SendOptions};
use evohub_domain::error::EvohubError;
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::{Payload, SystemMode};
use evohub_domain::time::Timestamp;

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;
use crate::ports::{CommandHandle, CommandSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    pub system_mode: SystemMode,
    pub until: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub struct OperatingMode {
    mode: Option<ModeState>,
}

impl OperatingMode {
    #[must_use]
    pub fn mode(&self) -> Option<ModeState> {
        self.mode
    }

    /// Ask the controller to change mode. Does not wait for the change.
    ///
    /// # Errors
    ///
    /// Returns a send error from the sink.
    pub fn set_mode<S: CommandSink + ?Sized>(
        &self,
        sink: &S,
        controller: DeviceId,
        mode: SystemMode,
        until: Option<Timestamp>,
    ) -> Result<CommandHandle, EvohubError> {
        tracing::debug!(%controller, ?mode, ?until, "setting system mode");
        sink.send(
            Command::set_system_mode(controller, mode, until),
            SendOptions::default(),
        )
    }

    /// # Errors
    ///
    /// Returns a send error from the sink.
    pub fn set_auto<S: CommandSink + ?Sized>(
        &self,
        sink: &S,
        controller: DeviceId,
    ) -> Result<CommandHandle, EvohubError> {
        self.set_mode(sink, controller, SystemMode::Auto, None)
    }

    /// Return to auto and drop every zone override.
    ///
    /// # Errors
    ///
    /// Returns a send error from the sink.
    pub fn reset_mode<S: CommandSink + ?Sized>(
        &self,
        sink: &S,
        controller: DeviceId,
    ) -> Result<CommandHandle, EvohubError> {
        self.set_mode(sink, controller, SystemMode::AutoWithReset, None)
    }
}

impl Capability for OperatingMode {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Mode
    }

    fn codes(&self) -> &'static [Code] {
        &[Code::SYSTEM_MODE]
    }

    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if let Payload::SystemMode { system_mode, until } = msg.payload()
            && msg.src() == ctx.controller
            && msg.carries_state()
        {
            self.mode = Some(ModeState {
                system_mode: *system_mode,
                until: *until,
            });
        }
        Ok(())
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        vec![Planned::params(Command::get_system_mode(controller)).every(TimeDelta::hours(1))]
    }

    fn status(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert(
            "system_mode".into(),
            json!(self.mode.map(|m| json!({
                "system_mode": m.system_mode,
                "until": m.until,
            }))),
        );
    }
}
