//! Registry: every system of the process, keyed by controller.
//!
//! The registry owns the shared [`DevicePool`] and decides which systems see
//! a message. It holds no process-wide state of its own: the orchestrator
//! creates one and passes it around.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use evohub_domain::device::{is_controller, is_zone_sensor_capable};
use evohub_domain::error::{EvohubError, LookupError, Role, ValidationError};
use evohub_domain::id::DeviceId;
use evohub_domain::message::{Code, Message};
use evohub_domain::schema::{SystemProfile, SystemSchema};
use evohub_domain::time::Timestamp;

use crate::config::EngineConfig;
use crate::devices::DevicePool;
use crate::ports::CommandSink;
use crate::system::System;

pub struct Registry<S> {
    config: EngineConfig,
    pool: DevicePool,
    sink: S,
    systems: BTreeMap<DeviceId, System<S>>,
}

impl<S: CommandSink + Clone> Registry<S> {
    #[must_use]
    pub fn new(config: EngineConfig, sink: S) -> Self {
        Self {
            config,
            pool: DevicePool::new(),
            sink,
            systems: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &DevicePool {
        &self.pool
    }

    #[must_use]
    pub fn system(&self, controller: DeviceId) -> Option<&System<S>> {
        self.systems.get(&controller)
    }

    pub fn system_mut(&mut self, controller: DeviceId) -> Option<&mut System<S>> {
        self.systems.get_mut(&controller)
    }

    pub fn systems(&self) -> impl Iterator<Item = &System<S>> {
        self.systems.values()
    }

    /// Register the system of `controller`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::DuplicateController`] if it is already
    /// registered and [`ValidationError::WrongDeviceKind`] if `controller` is
    /// not a controller address.
    #[tracing::instrument(skip(self))]
    pub fn create_system(
        &mut self,
        controller: DeviceId,
        profile: SystemProfile,
    ) -> Result<&mut System<S>, EvohubError> {
        if !is_controller(controller) {
            return Err(ValidationError::WrongDeviceKind {
                device: controller,
                role: Role::Controller,
            }
            .into());
        }
        if self.systems.contains_key(&controller) {
            return Err(LookupError::DuplicateController(controller).into());
        }
        tracing::info!(%controller, %profile, "created system");
        let system = System::new(
            controller,
            profile,
            self.config,
            self.pool.clone(),
            self.sink.clone(),
        );
        Ok(self.systems.entry(controller).or_insert(system))
    }

    /// Apply an explicit schema, creating its system if needed.
    ///
    /// # Errors
    ///
    /// Returns the first binding error; see [`System::apply_schema`].
    pub fn apply_schema(&mut self, schema: &SystemSchema) -> Result<(), EvohubError> {
        if !self.systems.contains_key(&schema.controller) {
            self.create_system(schema.controller, schema.profile())?;
        }
        self.systems
            .get_mut(&schema.controller)
            .ok_or(LookupError::UnknownSystem(schema.controller))?
            .apply_schema(schema)
    }

    /// Feed one inbound message.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a system; every target system still
    /// sees the message.
    #[tracing::instrument(skip(self, msg), fields(%msg))]
    pub fn handle_message(&mut self, msg: &Message) -> Result<(), EvohubError> {
        let src = msg.src();
        let ts = msg.timestamp();
        self.pool.touch(src, ts);
        if let Some(dst) = msg.dst() {
            self.pool.ensure(dst);
        }
        if msg.code() == Code::TEMPERATURE
            && !msg.is_array()
            && msg.carries_state()
            && is_zone_sensor_capable(src)
        {
            self.pool
                .record_reading(src, msg.payload().temperature(), ts);
        }
        self.attach(msg);

        if is_controller(src) && !self.systems.contains_key(&src) {
            let profile = SystemProfile::for_controller(src);
            self.create_system(src, profile)?.start_discovery(ts);
        }

        let targets = self.targets(msg);
        let mut result = Ok(());
        for (controller, system) in &mut self.systems {
            if !targets.contains(controller) {
                system.observe_actuator_sync(msg);
                continue;
            }
            if let Err(err) = system.handle_message(msg)
                && result.is_ok()
            {
                result = Err(err);
            }
        }
        result
    }

    fn attach(&self, msg: &Message) {
        let src = msg.src();
        let Some(dst) = msg.dst().filter(|dst| *dst != src) else {
            return;
        };
        let (device, controller) = match (is_controller(src), is_controller(dst)) {
            (true, false) => (dst, src),
            (false, true) => (src, dst),
            _ => return,
        };
        if self.pool.attach(device, controller) {
            tracing::debug!(%device, %controller, "attached device");
        }
    }

    fn targets(&self, msg: &Message) -> Vec<DeviceId> {
        let src = msg.src();
        let mut direct: Vec<_> = [Some(src), msg.dst()]
            .into_iter()
            .flatten()
            .filter(|id| self.systems.contains_key(id))
            .collect();
        direct.dedup();
        if !direct.is_empty() {
            return direct;
        }
        match self.pool.get(src).and_then(|d| d.controller()) {
            Some(controller) => vec![controller],
            None if msg.dst().is_none_or(|dst| dst == src) => {
                self.systems.keys().copied().collect()
            }
            None => Vec::new(),
        }
    }

    /// Drive every scheduler. Returns the number of requests emitted.
    pub fn tick(&mut self, now: Timestamp) -> usize {
        self.systems.values_mut().map(|s| s.tick(now)).sum()
    }

    /// `schema`, `params` and `status` of every system, keyed by controller.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let systems: Map<String, Value> = self
            .systems
            .iter()
            .map(|(id, system)| {
                (
                    id.to_string(),
                    json!({
                        "schema": system.schema(),
                        "params": system.params(),
                        "status": system.status(),
                    }),
                )
            })
            .collect();
        Value::Object(systems)
    }
}
