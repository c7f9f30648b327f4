//! Heating zones of a system.
//!
//! Zones come into existence the first time they are referenced: a `0005`
//! zone list, a per-zone array from the controller, an explicit schema or a
//! sensor binding.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use evohub_domain::command::{Command, DeviceRole};
use evohub_domain::device::{Parent, is_zone_sensor_capable};
use evohub_domain::error::{EvohubError, Role, ValidationError};
use evohub_domain::id::{DeviceId, ZoneIdx};
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::Payload;
use evohub_domain::zone::{Zone, ZoneType};

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;

const CODES: &[Code] = &[
    Code::ZONE_LIST,
    Code::ZONE_CONFIG,
    Code::SETPOINT,
    Code::TEMPERATURE,
];

/// Discovery plan of one zone.
#[must_use]
pub fn zone_plan(controller: DeviceId, idx: ZoneIdx) -> Vec<Planned> {
    let mut plan = Vec::new();
    if let Some(n) = idx.as_u8() {
        plan.push(Planned::schema(Command::get_device_list(
            controller,
            n,
            DeviceRole::ZoneSensor,
        )));
        plan.push(Planned::schema(Command::get_device_list(
            controller,
            n,
            DeviceRole::ZoneActuators,
        )));
    }
    plan.extend([
        Planned::params(Command::get_zone_config(controller, idx)),
        Planned::params(Command::get_zone_name(controller, idx)),
        Planned::status(Command::get_zone_mode(controller, idx)),
        Planned::status(Command::get_window_state(controller, idx)),
    ]);
    plan
}

#[derive(Debug, Default)]
pub struct MultiZone {
    zones: BTreeMap<ZoneIdx, Zone>,
}

impl MultiZone {
    #[must_use]
    pub fn zone(&self, idx: ZoneIdx) -> Option<&Zone> {
        self.zones.get(&idx)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    /// Every zone and its sensor, if bound.
    #[must_use]
    pub fn zone_sensors(&self) -> BTreeMap<ZoneIdx, Option<DeviceId>> {
        self.zones
            .iter()
            .map(|(idx, zone)| (*idx, zone.sensor()))
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidZoneIdx`] for `HW` and
    /// [`ValidationError::TooManyZones`] beyond the configured limit.
    pub fn get_or_create_zone(
        &mut self,
        ctx: &Context<'_>,
        idx: ZoneIdx,
    ) -> Result<&mut Zone, EvohubError> {
        let Some(n) = idx.as_u8() else {
            return Err(ValidationError::InvalidZoneIdx(idx.to_string()).into());
        };
        if n >= ctx.config.max_zones {
            return Err(ValidationError::TooManyZones {
                idx: idx.to_string(),
                max_zones: ctx.config.max_zones,
            }
            .into());
        }
        Ok(self.zones.entry(idx).or_insert_with(|| {
            tracing::debug!(controller = %ctx.controller, zone = %idx, "created zone");
            Zone::new(ctx.controller, idx)
        }))
    }

    /// Bind `device` as the sensor of zone `idx`, creating the zone if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WrongDeviceKind`] for a device that cannot
    /// sense a zone, and [`CorruptStateError`](evohub_domain::error::CorruptStateError)
    /// if the zone has another sensor or the device is bound elsewhere.
    pub fn bind_zone_sensor(
        &mut self,
        ctx: &Context<'_>,
        idx: ZoneIdx,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        if !is_zone_sensor_capable(device) {
            return Err(ValidationError::WrongDeviceKind {
                device,
                role: Role::ZoneSensor,
            }
            .into());
        }
        let parent = Parent::Zone {
            controller: ctx.controller,
            idx,
        };
        let zone = self.get_or_create_zone(ctx, idx)?;
        zone.check_sensor(device)?;
        ctx.pool.check_parent(device, parent, None)?;
        if zone.sensor() == Some(device) {
            return Ok(());
        }
        ctx.pool.set_parent(device, parent, None)?;
        zone.set_sensor(device)?;
        tracing::info!(controller = %ctx.controller, zone = %idx, sensor = %device, "bound zone sensor");
        Ok(())
    }

    /// Parent an actuator to zone `idx`.
    ///
    /// # Errors
    ///
    /// See [`get_or_create_zone`](Self::get_or_create_zone); also fails if the
    /// device is bound elsewhere.
    pub fn add_actuator(
        &mut self,
        ctx: &Context<'_>,
        idx: ZoneIdx,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        let zone = self.get_or_create_zone(ctx, idx)?;
        ctx.pool.set_parent(
            device,
            Parent::Zone {
                controller: ctx.controller,
                idx,
            },
            None,
        )?;
        zone.add_actuator(device);
        Ok(())
    }

    fn apply_zone_list(
        &mut self,
        ctx: &Context<'_>,
        zone_type: ZoneType,
        zones: &[ZoneIdx],
    ) -> Result<(), EvohubError> {
        let mut result = Ok(());
        for &idx in zones {
            let applied = self
                .get_or_create_zone(ctx, idx)
                .and_then(|zone| zone.set_zone_type(zone_type).map_err(EvohubError::from));
            if let Err(err) = applied
                && result.is_ok()
            {
                result = Err(err);
            }
        }
        result
    }

    fn each_zone<T>(
        &mut self,
        ctx: &Context<'_>,
        records: impl IntoIterator<Item = (ZoneIdx, T)>,
        apply: impl Fn(&mut Zone, T),
    ) -> Result<(), EvohubError> {
        for (idx, value) in records {
            apply(self.get_or_create_zone(ctx, idx)?, value);
        }
        Ok(())
    }

    fn project(&self, f: impl Fn(&Zone) -> Value) -> Value {
        Value::Object(
            self.zones
                .iter()
                .map(|(idx, zone)| (idx.to_string(), f(zone)))
                .collect(),
        )
    }
}

impl Capability for MultiZone {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::MultiZone
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
        if msg.src() != ctx.controller || !msg.carries_state() {
            return Ok(());
        }
        match msg.payload() {
            Payload::ZoneList { zone_type, zones } => {
                self.apply_zone_list(ctx, *zone_type, zones)
            }
            Payload::ZoneTemperatures { zones } => self.each_zone(
                ctx,
                zones.iter().map(|z| (z.zone_idx, z.temperature)),
                Zone::update_temperature,
            ),
            Payload::ZoneSetpoints { zones } => self.each_zone(
                ctx,
                zones.iter().map(|z| (z.zone_idx, z.setpoint)),
                Zone::update_setpoint,
            ),
            Payload::ZoneConfigs { zones } => self.each_zone(
                ctx,
                zones.iter().map(|z| (z.zone_idx, *z)),
                Zone::update_config,
            ),
            _ => Ok(()),
        }
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        ZoneType::PROBE_ORDER
            .into_iter()
            .map(|zone_type| Planned::schema(Command::get_zone_list(controller, zone_type)))
            .collect()
    }

    fn schema(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("zones".into(), self.project(Zone::schema));
    }

    fn params(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("zones".into(), self.project(Zone::params));
    }

    fn status(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("zones".into(), self.project(Zone::status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::devices::DevicePool;
    use crate::testing::{at, id, msg};
    use evohub_domain::message::Verb;
    use evohub_domain::payload::ZoneTemperature;
    use serde_json::json;

    const CTL: &str = "01:145038";

    fn with_ctx<R>(config: EngineConfig, f: impl FnOnce(&Context<'_>, &DevicePool) -> R) -> R {
        let pool = DevicePool::new();
        let ctx = Context {
            controller: id(CTL),
            pool: &pool,
            config: &config,
        };
        f(&ctx, &pool)
    }

    fn zone_list(zone_type: ZoneType, zones: &[u8]) -> Message {
        msg(
            Code::ZONE_LIST,
            Verb::Response,
            CTL,
            Some("18:000730"),
            Payload::ZoneList {
                zone_type,
                zones: zones.iter().map(|i| ZoneIdx::Zone(*i)).collect(),
            },
            at(0),
        )
    }

    #[test]
    fn should_create_listed_zones_with_their_type() {
        with_ctx(EngineConfig::default(), |ctx, _| {
            let mut mz = MultiZone::default();
            mz.handle_message(ctx, &zone_list(ZoneType::Rad, &[0, 1]), None)
                .unwrap();

            assert_eq!(mz.zones().count(), 2);
            assert_eq!(
                mz.zone(ZoneIdx::Zone(1)).and_then(Zone::zone_type),
                Some(ZoneType::Rad)
            );
        });
    }

    #[test]
    fn should_reject_a_changed_zone_type() {
        with_ctx(EngineConfig::default(), |ctx, _| {
            let mut mz = MultiZone::default();
            mz.handle_message(ctx, &zone_list(ZoneType::Rad, &[0]), None)
                .unwrap();

            let err = mz
                .handle_message(ctx, &zone_list(ZoneType::Ufh, &[0]), None)
                .unwrap_err();

            assert!(matches!(err, EvohubError::CorruptState(_)));
        });
    }

    #[test]
    fn should_reject_zone_beyond_limit() {
        let config = EngineConfig {
            max_zones: 2,
            ..EngineConfig::default()
        };
        with_ctx(config, |ctx, _| {
            let mut mz = MultiZone::default();
            let err = mz.get_or_create_zone(ctx, ZoneIdx::Zone(2)).unwrap_err();
            assert!(matches!(
                err,
                EvohubError::Validation(ValidationError::TooManyZones { max_zones: 2, .. })
            ));
            assert!(mz.get_or_create_zone(ctx, ZoneIdx::Hw).is_err());
        });
    }

    #[test]
    fn should_update_temperatures_from_controller_array() {
        with_ctx(EngineConfig::default(), |ctx, _| {
            let mut mz = MultiZone::default();
            let temps = msg(
                Code::TEMPERATURE,
                Verb::Information,
                CTL,
                None,
                Payload::ZoneTemperatures {
                    zones: vec![
                        ZoneTemperature::new(ZoneIdx::Zone(0), Some(19.0)),
                        ZoneTemperature::new(ZoneIdx::Zone(1), None),
                    ],
                },
                at(0),
            );
            mz.handle_message(ctx, &temps, None).unwrap();

            assert_eq!(mz.zone(ZoneIdx::Zone(0)).and_then(Zone::temperature), Some(19.0));
            assert_eq!(mz.zone(ZoneIdx::Zone(1)).and_then(Zone::temperature), None);
        });
    }

    #[test]
    fn should_bind_sensor_once_per_zone() {
        with_ctx(EngineConfig::default(), |ctx, pool| {
            let mut mz = MultiZone::default();
            mz.bind_zone_sensor(ctx, ZoneIdx::Zone(1), id("04:056057"))
                .unwrap();
            mz.bind_zone_sensor(ctx, ZoneIdx::Zone(1), id("04:056057"))
                .unwrap();

            let err = mz
                .bind_zone_sensor(ctx, ZoneIdx::Zone(2), id("04:056057"))
                .unwrap_err();

            assert!(matches!(err, EvohubError::CorruptState(_)));
            assert_eq!(mz.zone(ZoneIdx::Zone(2)).and_then(Zone::sensor), None);
            assert_eq!(
                pool.get(id("04:056057")).unwrap().zone_idx(),
                Some(ZoneIdx::Zone(1))
            );
        });
    }

    #[test]
    fn should_reject_relay_as_zone_sensor() {
        with_ctx(EngineConfig::default(), |ctx, _| {
            let err = MultiZone::default()
                .bind_zone_sensor(ctx, ZoneIdx::Zone(0), id("13:237335"))
                .unwrap_err();
            assert!(matches!(
                err,
                EvohubError::Validation(ValidationError::WrongDeviceKind { .. })
            ));
        });
    }

    #[test]
    fn should_probe_every_zone_type_in_order() {
        let plan = MultiZone::default().discovery(id(CTL));
        let payloads: Vec<_> = plan
            .iter()
            .map(|p| p.command.payload().to_string())
            .collect();
        assert_eq!(plan.len(), 5);
        assert!(payloads[0].ends_with("08"));
        assert!(payloads[4].ends_with("11"));
    }

    #[test]
    fn should_key_projections_by_zone_index() {
        with_ctx(EngineConfig::default(), |ctx, _| {
            let mut mz = MultiZone::default();
            mz.add_actuator(ctx, ZoneIdx::Zone(10), id("04:000001"))
                .unwrap();

            let mut out = Map::new();
            mz.schema(ctx, &mut out);
            assert_eq!(out["zones"]["0A"]["actuators"], json!(["04:000001"]));
        });
    }
}
