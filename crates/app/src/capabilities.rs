//! Capability composition.
//!
//! A system is the heating base plus a profile-dependent set of capabilities.
//! Each capability is a plain field; a `code → capabilities` table built once
//! at construction decides which of them see a message, in registration order.

pub mod datetime;
pub mod fault_log;
pub mod heating;
pub mod language;
pub mod mode;
pub mod multizone;
pub mod stored_hw;
pub mod underfloor;

use std::collections::HashMap;

use serde_json::{Map, Value};

use evohub_domain::error::EvohubError;
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message};
use evohub_domain::schema::SystemProfile;

use crate::config::EngineConfig;
use crate::devices::DevicePool;
use crate::discovery::Planned;

pub use datetime::DateTimeSync;
pub use fault_log::FaultLog;
pub use heating::Heating;
pub use language::Language;
pub use mode::OperatingMode;
pub use multizone::MultiZone;
pub use stored_hw::StoredHotWater;
pub use underfloor::Underfloor;

/// What a capability handler may read besides its own state.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub controller: DeviceId,
    pub pool: &'a DevicePool,
    pub config: &'a EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    Heating,
    FaultLog,
    DateTime,
    Language,
    Mode,
    StoredHw,
    MultiZone,
    Underfloor,
}

/// A separable unit of state, message handling and projection.
pub trait Capability {
    fn kind(&self) -> CapabilityKind;

    /// Codes this capability wants to see.
    fn codes(&self) -> &'static [Code];

    /// Apply a message. Must not change state when the same message is
    /// applied twice.
    ///
    /// # Errors
    ///
    /// Returns [`EvohubError`] when the message contradicts a binding.
    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        prev: Option<&Message>,
    ) -> Result<(), EvohubError>;

    /// System-level discovery requests.
    fn discovery(&self, _controller: DeviceId) -> Vec<Planned> {
        Vec::new()
    }

    fn schema(&self, _ctx: &Context<'_>, _out: &mut Map<String, Value>) {}

    fn params(&self, _ctx: &Context<'_>, _out: &mut Map<String, Value>) {}

    fn status(&self, _ctx: &Context<'_>, _out: &mut Map<String, Value>) {}
}

/// Capabilities carried by each profile, in registration order.
#[must_use]
pub fn kinds_for(profile: SystemProfile) -> &'static [CapabilityKind] {
    use CapabilityKind::{
        DateTime, FaultLog, Heating, Language, Mode, MultiZone, StoredHw, Underfloor,
    };
    match profile {
        SystemProfile::Evohome
        | SystemProfile::Chronotherm
        | SystemProfile::Programmer
        | SystemProfile::Sundial => &[
            Heating, FaultLog, DateTime, Language, Mode, StoredHw, MultiZone, Underfloor,
        ],
        SystemProfile::Hometronics | SystemProfile::Generic => &[Heating, DateTime, StoredHw],
    }
}

/// The composed capabilities of one system.
#[derive(Debug)]
pub struct Capabilities {
    pub(crate) heating: Heating,
    pub(crate) fault_log: Option<FaultLog>,
    pub(crate) datetime: Option<DateTimeSync>,
    pub(crate) language: Option<Language>,
    pub(crate) mode: Option<OperatingMode>,
    pub(crate) stored_hw: Option<StoredHotWater>,
    pub(crate) multizone: Option<MultiZone>,
    pub(crate) underfloor: Option<Underfloor>,
    order: Vec<CapabilityKind>,
    dispatch: HashMap<Code, Vec<CapabilityKind>>,
}

impl Capabilities {
    #[must_use]
    pub fn for_profile(profile: SystemProfile) -> Self {
        let kinds = kinds_for(profile);
        let has = |kind| kinds.contains(&kind);
        let mut caps = Self {
            heating: Heating::default(),
            fault_log: has(CapabilityKind::FaultLog).then(FaultLog::default),
            datetime: has(CapabilityKind::DateTime).then(DateTimeSync::default),
            language: has(CapabilityKind::Language).then(Language::default),
            mode: has(CapabilityKind::Mode).then(OperatingMode::default),
            stored_hw: has(CapabilityKind::StoredHw).then(StoredHotWater::default),
            multizone: has(CapabilityKind::MultiZone).then(MultiZone::default),
            underfloor: has(CapabilityKind::Underfloor).then(Underfloor::default),
            order: kinds.to_vec(),
            dispatch: HashMap::new(),
        };

        let mut dispatch: HashMap<Code, Vec<CapabilityKind>> = HashMap::new();
        for &kind in kinds {
            if let Some(cap) = caps.get(kind) {
                for &code in cap.codes() {
                    dispatch.entry(code).or_default().push(kind);
                }
            }
        }
        caps.dispatch = dispatch;
        caps
    }

    /// Registered capabilities, in registration order.
    #[must_use]
    pub fn kinds(&self) -> &[CapabilityKind] {
        &self.order
    }

    #[must_use]
    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.order.contains(&kind)
    }

    /// Capabilities interested in `code`, in registration order.
    #[must_use]
    pub fn interested(&self, code: Code) -> &[CapabilityKind] {
        self.dispatch.get(&code).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn get(&self, kind: CapabilityKind) -> Option<&dyn Capability> {
        match kind {
            CapabilityKind::Heating => Some(&self.heating),
            CapabilityKind::FaultLog => self.fault_log.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::DateTime => self.datetime.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::Language => self.language.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::Mode => self.mode.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::StoredHw => self.stored_hw.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::MultiZone => self.multizone.as_ref().map(|c| c as &dyn Capability),
            CapabilityKind::Underfloor => self.underfloor.as_ref().map(|c| c as &dyn Capability),
        }
    }

    pub fn get_mut(&mut self, kind: CapabilityKind) -> Option<&mut dyn Capability> {
        match kind {
            CapabilityKind::Heating => Some(&mut self.heating),
            CapabilityKind::FaultLog => self.fault_log.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::DateTime => self.datetime.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::Language => self.language.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::Mode => self.mode.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::StoredHw => self.stored_hw.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::MultiZone => self.multizone.as_mut().map(|c| c as &mut dyn Capability),
            CapabilityKind::Underfloor => {
                self.underfloor.as_mut().map(|c| c as &mut dyn Capability)
            }
        }
    }

    /// Hand `msg` to every interested capability.
    ///
    /// Every handler runs even if an earlier one fails; the first error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first handler error.
    pub fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        let kinds = self.interested(msg.code()).to_vec();
        let mut result = Ok(());
        for kind in kinds {
            let Some(cap) = self.get_mut(kind) else {
                continue;
            };
            if let Err(err) = cap.handle_message(ctx, msg, prev) {
                tracing::warn!(capability = ?kind, %msg, error = %err, "handler failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// System-level discovery requests of every capability.
    #[must_use]
    pub fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        self.order
            .iter()
            .filter_map(|&kind| self.get(kind))
            .flat_map(|cap| cap.discovery(controller))
            .collect()
    }

    pub fn schema(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        for &kind in &self.order {
            if let Some(cap) = self.get(kind) {
                cap.schema(ctx, out);
            }
        }
    }

    pub fn params(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        for &kind in &self.order {
            if let Some(cap) = self.get(kind) {
                cap.params(ctx, out);
            }
        }
    }

    pub fn status(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        for &kind in &self.order {
            if let Some(cap) = self.get(kind) {
                cap.status(ctx, out);
            }
        }
    }
}
