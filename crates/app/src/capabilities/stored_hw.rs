//! Stored hot water (the `HW` circuit).

use serde_json::{Map, Value, json};

use evohub_domain::command::{Command, DeviceRole};
use evohub_domain::device::{DeviceKind, Parent};
use evohub_domain::error::{EvohubError, Role, ValidationError};
use evohub_domain::id::{DeviceId, DomainId, ZoneIdx};
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::Payload;
use evohub_domain::zone::{DhwModeState, DhwZone};

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;
use crate::inference::find_dhw_sensor;

const CODES: &[Code] = &[Code::DHW_PARAMS, Code::DHW_TEMP, Code::DHW_MODE];

/// Discovery plan of a DHW circuit.
///
/// The sensor probe is part of the system plan, so it is not repeated here.
#[must_use]
pub fn dhw_plan(controller: DeviceId) -> Vec<Planned> {
    vec![
        Planned::schema(Command::get_device_list(controller, 0, DeviceRole::DhwValve)),
        Planned::schema(Command::get_device_list(controller, 0, DeviceRole::HtgValve)),
        Planned::params(Command::get_dhw_params(controller)),
        Planned::status(Command::get_dhw_temp(controller)),
        Planned::status(Command::get_dhw_mode(controller)),
    ]
}

#[derive(Debug, Default)]
pub struct StoredHotWater {
    dhw: Option<DhwZone>,
}

impl StoredHotWater {
    #[must_use]
    pub fn dhw(&self) -> Option<&DhwZone> {
        self.dhw.as_ref()
    }

    pub fn get_or_create_dhw(&mut self, controller: DeviceId) -> &mut DhwZone {
        self.dhw.get_or_insert_with(|| {
            tracing::debug!(%controller, "created DHW circuit");
            DhwZone::new(controller)
        })
    }

    fn bind(
        &mut self,
        ctx: &Context<'_>,
        device: DeviceId,
        role: Role,
        kind: DeviceKind,
        domain_id: Option<DomainId>,
    ) -> Result<(), EvohubError> {
        if DeviceKind::from_type(device.device_type()) != kind {
            return Err(ValidationError::WrongDeviceKind { device, role }.into());
        }
        let parent = Parent::Zone {
            controller: ctx.controller,
            idx: ZoneIdx::Hw,
        };
        let dhw = self.get_or_create_dhw(ctx.controller);
        dhw.check(role, device)?;
        ctx.pool.check_parent(device, parent, domain_id)?;

        let current = match role {
            Role::DhwSensor => dhw.sensor(),
            Role::DhwValve => dhw.dhw_valve(),
            _ => dhw.htg_valve(),
        };
        if current == Some(device) {
            return Ok(());
        }
        ctx.pool.set_parent(device, parent, domain_id)?;
        match role {
            Role::DhwSensor => dhw.set_sensor(device)?,
            Role::DhwValve => dhw.set_dhw_valve(device)?,
            _ => dhw.set_htg_valve(device)?,
        }
        tracing::info!(controller = %ctx.controller, %device, %role, "bound DHW device");
        Ok(())
    }

    /// Bind the DHW sensor (`07:`).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WrongDeviceKind`] for other device types and
    /// [`CorruptStateError`](evohub_domain::error::CorruptStateError) if a
    /// different sensor is bound or the device is bound elsewhere.
    pub fn bind_sensor(&mut self, ctx: &Context<'_>, device: DeviceId) -> Result<(), EvohubError> {
        self.bind(ctx, device, Role::DhwSensor, DeviceKind::DhwSensor, None)
    }

    /// Bind the hot water valve relay, stamping domain `FA`.
    ///
    /// # Errors
    ///
    /// See [`bind_sensor`](Self::bind_sensor).
    pub fn bind_dhw_valve(
        &mut self,
        ctx: &Context<'_>,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        self.bind(
            ctx,
            device,
            Role::DhwValve,
            DeviceKind::Relay,
            Some(DomainId::DHW_VALVE),
        )
    }

    /// Bind the heating valve relay, stamping domain `F9`.
    ///
    /// # Errors
    ///
    /// See [`bind_sensor`](Self::bind_sensor).
    pub fn bind_htg_valve(
        &mut self,
        ctx: &Context<'_>,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        self.bind(
            ctx,
            device,
            Role::HeatingValve,
            DeviceKind::Relay,
            Some(DomainId::HEATING_VALVE),
        )
    }

    /// Bind the DHW sensor evidenced by a `10A0` reply, if any.
    ///
    /// Returns the sensor the message pointed at.
    ///
    /// # Errors
    ///
    /// See [`bind_sensor`](Self::bind_sensor).
    pub fn maybe_learn_dhw_sensor(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
    ) -> Result<Option<DeviceId>, EvohubError> {
        let Some(sensor) = find_dhw_sensor(ctx.controller, msg) else {
            return Ok(None);
        };
        tracing::debug!(controller = %ctx.controller, %sensor, "DHW sensor evidence");
        self.bind_sensor(ctx, sensor)?;
        Ok(Some(sensor))
    }
}

impl Capability for StoredHotWater {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::StoredHw
    }

    fn codes(&self) -> &'static [Code] {
        CODES
    }

    fn handle_message(
        &mut self,
        ctx: &Context<'_>,
        msg: &Message,
        _prev: Option<&Message>,
    ) -> Result<(), EvohubError> {
        if !msg.carries_state() {
            return Ok(());
        }
        let from_controller = msg.src() == ctx.controller;
        let from_sensor = self
            .dhw
            .as_ref()
            .and_then(DhwZone::sensor)
            .is_some_and(|sensor| sensor == msg.src());

        match (msg.code(), msg.payload()) {
            (Code::DHW_PARAMS, Payload::DhwParams(params)) if from_controller => {
                self.get_or_create_dhw(ctx.controller).update_params(*params);
            }
            (Code::DHW_TEMP, Payload::Temperature { temperature })
                if from_controller || from_sensor =>
            {
                self.get_or_create_dhw(ctx.controller)
                    .update_temperature(*temperature);
            }
            (Code::DHW_MODE, Payload::DhwMode { active, mode, until }) if from_controller => {
                self.get_or_create_dhw(ctx.controller)
                    .update_mode(DhwModeState {
                        active: *active,
                        mode: mode.clone(),
                        until: *until,
                    });
            }
            _ => {}
        }
        Ok(())
    }

    fn schema(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert(
            "stored_hotwater".into(),
            self.dhw.as_ref().map_or(Value::Null, DhwZone::schema),
        );
    }

    fn params(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert(
            "stored_hotwater".into(),
            self.dhw
                .as_ref()
                .map_or(Value::Null, DhwZone::params_projection),
        );
    }

    fn status(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert(
            "stored_hotwater".into(),
            json!(self.dhw.as_ref().map(DhwZone::status)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::devices::DevicePool;
    use crate::testing::{at, id, msg};
    use evohub_domain::message::Verb;
    use evohub_domain::payload::DhwParams;

    const CTL: &str = "01:145038";

    struct Fixture {
        pool: DevicePool,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: DevicePool::new(),
                config: EngineConfig::default(),
            }
        }

        fn ctx(&self) -> Context<'_> {
            Context {
                controller: id(CTL),
                pool: &self.pool,
                config: &self.config,
            }
        }
    }

    #[test]
    fn should_learn_sensor_from_params_reply() {
        let fx = Fixture::new();
        let mut hw = StoredHotWater::default();
        let reply = msg(
            Code::DHW_PARAMS,
            Verb::Response,
            CTL,
            Some("07:045960"),
            Payload::DhwParams(DhwParams {
                setpoint: 50.0,
                overrun: 5,
                differential: 1.0,
            }),
            at(0),
        );

        hw.handle_message(&fx.ctx(), &reply, None).unwrap();
        let learned = hw.maybe_learn_dhw_sensor(&fx.ctx(), &reply).unwrap();

        assert_eq!(learned, Some(id("07:045960")));
        let dhw = hw.dhw().unwrap();
        assert_eq!(dhw.sensor(), Some(id("07:045960")));
        assert_eq!(dhw.params().map(|p| p.setpoint), Some(50.0));
        assert_eq!(
            fx.pool.get(id("07:045960")).unwrap().zone_idx(),
            Some(ZoneIdx::Hw)
        );
    }

    #[test]
    fn should_reject_a_second_dhw_sensor() {
        let fx = Fixture::new();
        let mut hw = StoredHotWater::default();
        hw.bind_sensor(&fx.ctx(), id("07:045960")).unwrap();
        hw.bind_sensor(&fx.ctx(), id("07:045960")).unwrap();

        let err = hw.bind_sensor(&fx.ctx(), id("07:000001")).unwrap_err();

        assert!(matches!(err, EvohubError::CorruptState(_)));
        assert_eq!(hw.dhw().and_then(DhwZone::sensor), Some(id("07:045960")));
    }

    #[test]
    fn should_stamp_valve_domains() {
        let fx = Fixture::new();
        let mut hw = StoredHotWater::default();
        hw.bind_dhw_valve(&fx.ctx(), id("13:000001")).unwrap();
        hw.bind_htg_valve(&fx.ctx(), id("13:000002")).unwrap();

        assert_eq!(
            fx.pool.get(id("13:000001")).unwrap().domain_id(),
            Some(DomainId::DHW_VALVE)
        );
        assert_eq!(
            fx.pool.get(id("13:000002")).unwrap().domain_id(),
            Some(DomainId::HEATING_VALVE)
        );
    }

    #[test]
    fn should_not_use_one_relay_as_both_valves() {
        let fx = Fixture::new();
        let mut hw = StoredHotWater::default();
        hw.bind_dhw_valve(&fx.ctx(), id("13:000001")).unwrap();

        let err = hw.bind_htg_valve(&fx.ctx(), id("13:000001")).unwrap_err();

        assert!(matches!(err, EvohubError::CorruptState(_)));
        assert_eq!(hw.dhw().and_then(DhwZone::htg_valve), None);
    }

    #[test]
    fn should_reject_sensor_of_wrong_kind() {
        let fx = Fixture::new();
        let err = StoredHotWater::default()
            .bind_sensor(&fx.ctx(), id("04:056057"))
            .unwrap_err();
        assert!(matches!(
            err,
            EvohubError::Validation(ValidationError::WrongDeviceKind { .. })
        ));
    }

    #[test]
    fn should_take_temperature_from_bound_sensor_only() {
        let fx = Fixture::new();
        let mut hw = StoredHotWater::default();
        let reading = |src| {
            msg(
                Code::DHW_TEMP,
                Verb::Information,
                src,
                None,
                Payload::Temperature {
                    temperature: Some(48.5),
                },
                at(0),
            )
        };

        hw.handle_message(&fx.ctx(), &reading("07:045960"), None)
            .unwrap();
        assert!(hw.dhw().is_none());

        hw.bind_sensor(&fx.ctx(), id("07:045960")).unwrap();
        hw.handle_message(&fx.ctx(), &reading("07:045960"), None)
            .unwrap();
        assert_eq!(hw.dhw().and_then(DhwZone::temperature), Some(48.5));
    }

    #[test]
    fn should_project_null_without_circuit() {
        let fx = Fixture::new();
        let mut out = Map::new();
        StoredHotWater::default().schema(&fx.ctx(), &mut out);
        assert_eq!(out["stored_hotwater"], Value::Null);
    }
}
