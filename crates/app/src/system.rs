//! System: the aggregate of one controller.
//!
//! A system owns its capabilities, its discovery schedulers (one for the
//! system, one per zone and one for the DHW circuit) and the memory of the
//! last message of each code, which is what makes replays harmless.
//! [`System::handle_message`] is the only mutation entry point for traffic;
//! explicit bindings go through the same ownership-checked setters the
//! inference engine uses.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value, json};

use evohub_domain::command::Command;
use evohub_domain::discovery::{DiscoveryFlags, DiscoveryPhase};
use evohub_domain::error::{EvohubError, LookupError, ValidationError};
use evohub_domain::id::{DeviceId, ZoneIdx};
use evohub_domain::message::{Code, Message, Verb};
use evohub_domain::payload::SystemMode;
use evohub_domain::schema::{SystemProfile, SystemSchema};
use evohub_domain::time::{Timestamp, now};
use evohub_domain::zone::{DhwZone, Zone};

use crate::capabilities::fault_log::FaultLogEntries;
use crate::capabilities::multizone::zone_plan;
use crate::capabilities::stored_hw::dhw_plan;
use crate::capabilities::{Capabilities, CapabilityKind, Context, StoredHotWater};
use crate::config::EngineConfig;
use crate::devices::DevicePool;
use crate::discovery::{DiscoveryScheduler, Planned};
use crate::inference::zone_sensor::contradictions;
use crate::inference::{
    INFERENCE_CODES, ZoneSensorEvidence, find_dhw_sensor, find_htg_control, find_zone_sensors,
};
use crate::ports::{CommandHandle, CommandSink};

/// Borrow the handler context from disjoint fields, leaving
/// `self.capabilities` free for a mutable borrow.
macro_rules! ctx {
    ($system:ident) => {
        Context {
            controller: $system.controller,
            pool: &$system.pool,
            config: &$system.config,
        }
    };
}

/// A learned relationship whose inference can be suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    HeatingControl,
    ZoneSensor(ZoneIdx),
    DhwSensor,
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeatingControl => f.write_str("htg_control"),
            Self::ZoneSensor(idx) => write!(f, "zone_sensor/{idx}"),
            Self::DhwSensor => f.write_str("dhw_sensor"),
        }
    }
}

fn is_actuator_sync(msg: &Message) -> bool {
    msg.code() == Code::ACTUATOR_SYNC && msg.verb() == Verb::Information
}

fn unsupported(operation: &'static str, profile: SystemProfile) -> EvohubError {
    ValidationError::UnsupportedOperation {
        operation,
        profile: profile.to_string(),
    }
    .into()
}

fn system_plan(
    controller: DeviceId,
    profile: SystemProfile,
    capabilities: &Capabilities,
) -> Vec<Planned> {
    let sync = Planned::status(Command::get_system_sync(controller));
    match profile {
        SystemProfile::Hometronics => vec![sync],
        SystemProfile::Generic => capabilities.discovery(controller),
        _ => {
            let mut plan = capabilities.discovery(controller);
            plan.push(sync);
            plan
        }
    }
}

pub struct System<S> {
    controller: DeviceId,
    profile: SystemProfile,
    config: EngineConfig,
    pool: DevicePool,
    sink: S,
    capabilities: Capabilities,
    scheduler: DiscoveryScheduler,
    zone_schedulers: BTreeMap<ZoneIdx, DiscoveryScheduler>,
    last_by_key: HashMap<(Code, bool), Message>,
    /// Latest `3B00` I heard from any source, routed here or not.
    last_actuator_sync: Option<Message>,
    suspended: BTreeSet<Relationship>,
    clock: Option<Timestamp>,
}

impl<S: CommandSink> System<S> {
    /// Create the aggregate of `controller`. Discovery does not start until
    /// [`start_discovery`](Self::start_discovery) or the first
    /// [`tick`](Self::tick).
    #[must_use]
    pub fn new(
        controller: DeviceId,
        profile: SystemProfile,
        config: EngineConfig,
        pool: DevicePool,
        sink: S,
    ) -> Self {
        let capabilities = Capabilities::for_profile(profile);
        let flags = if config.disable_discovery {
            DiscoveryFlags::empty()
        } else {
            DiscoveryFlags::ALL
        };
        let scheduler = DiscoveryScheduler::new(
            controller.to_string(),
            flags,
            system_plan(controller, profile, &capabilities),
        );
        pool.ensure(controller);
        Self {
            controller,
            profile,
            config,
            pool,
            sink,
            capabilities,
            scheduler,
            zone_schedulers: BTreeMap::new(),
            last_by_key: HashMap::new(),
            last_actuator_sync: None,
            suspended: BTreeSet::new(),
            clock: None,
        }
    }

    #[must_use]
    pub fn controller(&self) -> DeviceId {
        self.controller
    }

    #[must_use]
    pub fn profile(&self) -> SystemProfile {
        self.profile
    }

    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[must_use]
    pub fn phase(&self) -> DiscoveryPhase {
        self.scheduler.phase()
    }

    /// Discovery phase of a zone (or `HW`), once the zone exists.
    #[must_use]
    pub fn zone_phase(&self, idx: ZoneIdx) -> Option<DiscoveryPhase> {
        self.zone_schedulers.get(&idx).map(DiscoveryScheduler::phase)
    }

    #[must_use]
    pub fn is_suspended(&self, relationship: Relationship) -> bool {
        self.suspended.contains(&relationship)
    }

    /// The heating-control relay: bound, or the single `FC` device attached.
    #[must_use]
    pub fn htg_control(&self) -> Option<DeviceId> {
        self.capabilities.heating.heating_control(&ctx!(self))
    }

    #[must_use]
    pub fn zone(&self, idx: ZoneIdx) -> Option<&Zone> {
        self.capabilities.multizone.as_ref()?.zone(idx)
    }

    #[must_use]
    pub fn dhw(&self) -> Option<&DhwZone> {
        self.capabilities.stored_hw.as_ref()?.dhw()
    }

    /// Latest message time seen, or wall-clock time before any message.
    fn clock(&self) -> Timestamp {
        self.clock.unwrap_or_else(now)
    }

    /// Emit the creation-time discovery requests of the system and of every
    /// zone known so far.
    ///
    /// Returns the number of requests emitted.
    #[tracing::instrument(skip(self), fields(controller = %self.controller))]
    pub fn start_discovery(&mut self, now: Timestamp) -> usize {
        let mut sent = self.scheduler.start(now, &self.sink);
        for scheduler in self.zone_schedulers.values_mut() {
            sent += scheduler.start(now, &self.sink);
        }
        sent
    }

    /// Re-issue periodic requests that are due.
    pub fn tick(&mut self, now: Timestamp) -> usize {
        let mut sent = self.scheduler.tick(now, &self.sink);
        for scheduler in self.zone_schedulers.values_mut() {
            sent += scheduler.tick(now, &self.sink);
        }
        sent
    }

    /// Note a `3B00` broadcast that was heard but not routed to this system,
    /// so the next `3B00` of the controller is paired with what really
    /// preceded it.
    pub fn observe_actuator_sync(&mut self, msg: &Message) {
        if is_actuator_sync(msg)
            && self
                .last_actuator_sync
                .as_ref()
                .is_none_or(|last| last.timestamp() <= msg.timestamp())
        {
            self.last_actuator_sync = Some(msg.clone());
        }
    }

    /// Apply one message.
    ///
    /// A message equal to, or older than, the last one of its code is
    /// ignored. Capability handlers run first, then inference.
    ///
    /// # Errors
    ///
    /// Returns the first [`EvohubError`] raised by a handler or by a binding
    /// the inference engine attempted. The message is still fully applied.
    #[tracing::instrument(skip(self, msg), fields(controller = %self.controller, %msg))]
    pub fn handle_message(&mut self, msg: &Message) -> Result<(), EvohubError> {
        let key = (msg.code(), msg.is_array());
        let prev = self.last_by_key.get(&key).cloned();
        if let Some(prev) = &prev
            && (prev == msg || msg.timestamp() < prev.timestamp())
        {
            tracing::trace!("duplicate or stale message");
            return Ok(());
        }
        self.last_by_key.insert(key, msg.clone());
        let preceding_sync = if is_actuator_sync(msg) {
            self.last_actuator_sync.replace(msg.clone())
        } else {
            None
        };
        self.clock = Some(self.clock.map_or(msg.timestamp(), |c| c.max(msg.timestamp())));

        let ctx = ctx!(self);
        let mut result = self
            .capabilities
            .handle_message(&ctx, msg, prev.as_ref());

        let evidence_prev = if msg.code() == Code::ACTUATOR_SYNC {
            preceding_sync.as_ref()
        } else {
            prev.as_ref()
        };
        if INFERENCE_CODES.contains(&msg.code())
            && let Err(err) = self.infer(msg, evidence_prev)
            && result.is_ok()
        {
            result = Err(err);
        }
        self.sync_schedulers();
        result
    }

    fn infer(&mut self, msg: &Message, prev: Option<&Message>) -> Result<(), EvohubError> {
        match msg.code() {
            Code::TEMPERATURE if msg.is_array() => self.infer_zone_sensors(msg, prev),
            Code::DHW_PARAMS => self.infer_dhw_sensor(msg),
            Code::OPENTHERM | Code::ACTUATOR_STATE | Code::ACTUATOR_SYNC => {
                self.infer_htg_control(msg, prev)
            }
            _ => Ok(()),
        }
    }

    fn suspend_on_conflict(
        &mut self,
        relationship: Relationship,
        result: Result<(), EvohubError>,
    ) -> Result<(), EvohubError> {
        if let Err(EvohubError::CorruptState(err)) = &result {
            tracing::warn!(controller = %self.controller, %relationship, error = %err, "suspending inference");
            self.suspended.insert(relationship);
        }
        result
    }

    fn infer_htg_control(
        &mut self,
        msg: &Message,
        prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if self.is_suspended(Relationship::HeatingControl) {
            return Ok(());
        }
        let Some(relay) = find_htg_control(self.controller, msg, prev) else {
            return Ok(());
        };
        let ctx = ctx!(self);
        let heating = &mut self.capabilities.heating;
        if !self.config.enable_eavesdrop {
            if let Err(err) = heating.check_htg_control(&ctx, relay) {
                tracing::warn!(controller = %self.controller, %relay, error = %err, "traffic contradicts heating control");
            }
            return Ok(());
        }
        if heating.htg_control().is_some() {
            return Ok(());
        }
        tracing::debug!(controller = %self.controller, %relay, code = %msg.code(), "heating control evidence");
        let result = heating.set_htg_control(&ctx, relay);
        self.suspend_on_conflict(Relationship::HeatingControl, result)
    }

    fn infer_dhw_sensor(&mut self, msg: &Message) -> Result<(), EvohubError> {
        if self.is_suspended(Relationship::DhwSensor) {
            return Ok(());
        }
        let ctx = ctx!(self);
        let Some(stored_hw) = self.capabilities.stored_hw.as_mut() else {
            return Ok(());
        };
        if !self.config.enable_eavesdrop {
            if let Some(sensor) = find_dhw_sensor(self.controller, msg)
                && let Some(existing) = stored_hw.dhw().and_then(DhwZone::sensor)
                && existing != sensor
            {
                tracing::warn!(controller = %self.controller, %existing, %sensor, "traffic contradicts DHW sensor");
            }
            return Ok(());
        }
        let result = stored_hw.maybe_learn_dhw_sensor(&ctx, msg).map(|_| ());
        self.suspend_on_conflict(Relationship::DhwSensor, result)
    }

    fn infer_zone_sensors(
        &mut self,
        msg: &Message,
        prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        let Some(prev) = prev else {
            return Ok(());
        };
        let Some(multizone) = self.capabilities.multizone.as_ref() else {
            return Ok(());
        };
        if msg.src() != self.controller || prev.src() != self.controller {
            return Ok(());
        }

        let devices = self.pool.snapshot();
        let evidence = ZoneSensorEvidence {
            controller: self.controller,
            this: msg,
            prev,
            remaining_seconds: self.capabilities.heating.remaining_seconds(),
            zone_sensors: multizone.zone_sensors(),
            suspended: self
                .suspended
                .iter()
                .filter_map(|r| match r {
                    Relationship::ZoneSensor(idx) => Some(*idx),
                    _ => None,
                })
                .collect(),
            devices: &devices,
        };

        if !self.config.enable_eavesdrop {
            for (zone, sensor) in contradictions(&evidence) {
                tracing::warn!(controller = %self.controller, %zone, %sensor, "zone temperature contradicts its sensor");
            }
            return Ok(());
        }

        let mut result = Ok(());
        for found in find_zone_sensors(&evidence) {
            if found.by_exclusion {
                tracing::info!(controller = %self.controller, zone = %found.zone, "assuming controller senses zone");
            }
            let ctx = ctx!(self);
            let bound = match self.capabilities.multizone.as_mut() {
                Some(multizone) => multizone.bind_zone_sensor(&ctx, found.zone, found.sensor),
                None => Ok(()),
            };
            if let Err(err) = self.suspend_on_conflict(Relationship::ZoneSensor(found.zone), bound)
                && result.is_ok()
            {
                result = Err(err);
            }
        }
        result
    }

    /// Create schedulers for zones and the DHW circuit that appeared since the
    /// last call, starting them if system discovery has started.
    fn sync_schedulers(&mut self) {
        let controller = self.controller;
        let mut created: Vec<(ZoneIdx, Vec<Planned>)> = Vec::new();
        if let Some(multizone) = &self.capabilities.multizone {
            created.extend(
                multizone
                    .zones()
                    .map(Zone::idx)
                    .filter(|idx| !self.zone_schedulers.contains_key(idx))
                    .map(|idx| (idx, zone_plan(controller, idx))),
            );
        }
        if self.dhw().is_some() && !self.zone_schedulers.contains_key(&ZoneIdx::Hw) {
            created.push((ZoneIdx::Hw, dhw_plan(controller)));
        }
        if created.is_empty() {
            return;
        }

        let started = self.scheduler.phase() != DiscoveryPhase::Uninitialized;
        let flags = self.scheduler.flags();
        let now = self.clock();
        for (idx, plan) in created {
            let mut scheduler = DiscoveryScheduler::new(format!("{controller}/{idx}"), flags, plan);
            if started {
                scheduler.start(now, &self.sink);
            }
            self.zone_schedulers.insert(idx, scheduler);
        }
    }

    /// Bind the heating-control relay.
    ///
    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] if another relay is bound, or a
    /// validation error for a device that cannot be one.
    pub fn set_htg_control(&mut self, device: DeviceId) -> Result<(), EvohubError> {
        let ctx = ctx!(self);
        self.capabilities.heating.set_htg_control(&ctx, device)
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedOperation`] if the profile has no
    /// zones, or a validation error for an index out of range.
    pub fn get_or_create_zone(&mut self, idx: ZoneIdx) -> Result<&Zone, EvohubError> {
        let profile = self.profile;
        let ctx = ctx!(self);
        self.capabilities
            .multizone
            .as_mut()
            .ok_or_else(|| unsupported("get_or_create_zone", profile))?
            .get_or_create_zone(&ctx, idx)?;
        self.sync_schedulers();
        self.zone(idx)
            .ok_or_else(|| EvohubError::from(ValidationError::InvalidZoneIdx(idx.to_string())))
    }

    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] on a conflicting binding.
    pub fn bind_zone_sensor(&mut self, idx: ZoneIdx, device: DeviceId) -> Result<(), EvohubError> {
        let profile = self.profile;
        let ctx = ctx!(self);
        self.capabilities
            .multizone
            .as_mut()
            .ok_or_else(|| unsupported("bind_zone_sensor", profile))?
            .bind_zone_sensor(&ctx, idx, device)?;
        self.sync_schedulers();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] if the device is bound elsewhere.
    pub fn add_zone_actuator(&mut self, idx: ZoneIdx, device: DeviceId) -> Result<(), EvohubError> {
        let profile = self.profile;
        let ctx = ctx!(self);
        self.capabilities
            .multizone
            .as_mut()
            .ok_or_else(|| unsupported("add_zone_actuator", profile))?
            .add_actuator(&ctx, idx, device)?;
        self.sync_schedulers();
        Ok(())
    }

    fn with_stored_hw(
        &mut self,
        operation: &'static str,
        bind: fn(&mut StoredHotWater, &Context<'_>, DeviceId) -> Result<(), EvohubError>,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        let profile = self.profile;
        let ctx = ctx!(self);
        let stored_hw = self
            .capabilities
            .stored_hw
            .as_mut()
            .ok_or_else(|| unsupported(operation, profile))?;
        bind(stored_hw, &ctx, device)?;
        self.sync_schedulers();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] on a conflicting binding.
    pub fn bind_dhw_sensor(&mut self, device: DeviceId) -> Result<(), EvohubError> {
        self.with_stored_hw(
            "bind_dhw_sensor",
            StoredHotWater::bind_sensor,
            device,
        )
    }

    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] on a conflicting binding.
    pub fn bind_dhw_valve(&mut self, device: DeviceId) -> Result<(), EvohubError> {
        self.with_stored_hw(
            "bind_dhw_valve",
            StoredHotWater::bind_dhw_valve,
            device,
        )
    }

    /// # Errors
    ///
    /// Returns [`EvohubError::CorruptState`] on a conflicting binding.
    pub fn bind_htg_valve(&mut self, device: DeviceId) -> Result<(), EvohubError> {
        self.with_stored_hw(
            "bind_htg_valve",
            StoredHotWater::bind_htg_valve,
            device,
        )
    }

    /// Bind everything an explicit schema names.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::UnknownSystem`] for a schema of another
    /// controller, or the first binding error. Bindings before the failing
    /// one stay applied.
    #[tracing::instrument(skip(self, schema), fields(controller = %self.controller))]
    pub fn apply_schema(&mut self, schema: &SystemSchema) -> Result<(), EvohubError> {
        if schema.controller != self.controller {
            return Err(LookupError::UnknownSystem(schema.controller).into());
        }
        if let Some(relay) = schema.htg_control {
            self.set_htg_control(relay)?;
        }
        if let Some(dhw) = &schema.dhw {
            if let Some(sensor) = dhw.sensor {
                self.bind_dhw_sensor(sensor)?;
            }
            if let Some(valve) = dhw.dhw_valve {
                self.bind_dhw_valve(valve)?;
            }
            if let Some(valve) = dhw.htg_valve {
                self.bind_htg_valve(valve)?;
            }
        }
        for (&idx, zone) in &schema.zones {
            self.get_or_create_zone(idx)?;
            if let Some(zone_type) = zone.zone_type {
                let ctx = ctx!(self);
                if let Some(multizone) = self.capabilities.multizone.as_mut() {
                    multizone
                        .get_or_create_zone(&ctx, idx)?
                        .set_zone_type(zone_type)?;
                }
            }
            if let Some(sensor) = zone.sensor {
                self.bind_zone_sensor(idx, sensor)?;
            }
            for &actuator in &zone.actuators {
                self.add_zone_actuator(idx, actuator)?;
            }
        }
        tracing::info!(zones = schema.zones.len(), "applied schema");
        Ok(())
    }

    /// Ask the controller to change mode.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedOperation`] if the profile has no
    /// operating mode, or a send error.
    pub fn set_mode(
        &self,
        mode: SystemMode,
        until: Option<Timestamp>,
    ) -> Result<CommandHandle, EvohubError> {
        self.capabilities
            .mode
            .as_ref()
            .ok_or_else(|| unsupported("set_mode", self.profile))?
            .set_mode(&self.sink, self.controller, mode, until)
    }

    /// # Errors
    ///
    /// See [`set_mode`](Self::set_mode).
    pub fn set_auto(&self) -> Result<CommandHandle, EvohubError> {
        self.capabilities
            .mode
            .as_ref()
            .ok_or_else(|| unsupported("set_auto", self.profile))?
            .set_auto(&self.sink, self.controller)
    }

    /// # Errors
    ///
    /// See [`set_mode`](Self::set_mode).
    pub fn reset_mode(&self) -> Result<CommandHandle, EvohubError> {
        self.capabilities
            .mode
            .as_ref()
            .ok_or_else(|| unsupported("reset_mode", self.profile))?
            .reset_mode(&self.sink, self.controller)
    }

    /// Return the controller's fault log, fetching it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EvohubError::ExpiredCallback`] if the fetch does not finish
    /// before `deadline`; the stored log is then left as it was.
    pub async fn get_fault_log(
        &mut self,
        force_refresh: bool,
        deadline: Duration,
    ) -> Result<FaultLogEntries, EvohubError> {
        let profile = self.profile;
        self.capabilities
            .fault_log
            .as_mut()
            .ok_or_else(|| unsupported("get_fault_log", profile))?
            .get_fault_log(&self.sink, self.controller, force_refresh, deadline)
            .await
    }

    #[must_use]
    pub fn schema(&self) -> Value {
        let mut out = Map::new();
        out.insert("controller".into(), json!(self.controller));
        out.insert("profile".into(), json!(self.profile));
        self.capabilities.schema(&ctx!(self), &mut out);
        Value::Object(out)
    }

    #[must_use]
    pub fn params(&self) -> Value {
        let mut out = Map::new();
        self.capabilities.params(&ctx!(self), &mut out);
        Value::Object(out)
    }

    #[must_use]
    pub fn status(&self) -> Value {
        let mut out = Map::new();
        self.capabilities.status(&ctx!(self), &mut out);
        out.insert("discovery".into(), json!(self.scheduler.phase()));
        out.insert(
            "suspended".into(),
            json!(
                self.suspended
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            ),
        );
        Value::Object(out)
    }

    #[must_use]
    pub fn has(&self, kind: CapabilityKind) -> bool {
        self.capabilities.has(kind)
    }
}
