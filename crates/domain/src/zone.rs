//! Zones: heating circuits and the stored hot water circuit.
//!
//! A zone references its sensor by address only; the device itself lives in
//! the device pool and outlives no one. All reference setters are write-once.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CorruptStateError, Role};
use crate::id::{DeviceId, ZoneIdx};
use crate::payload::{DhwParams, ZoneConfig};
use crate::time::Timestamp;

/// Heating circuit type, as reported by `0005`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneType {
    /// Radiator valves.
    Rad,
    /// Underfloor heating.
    Ufh,
    /// Zone valve.
    Val,
    /// Mixing valve.
    Mix,
    /// Electric heat.
    Ele,
}

impl ZoneType {
    /// Order in which zone types are probed during schema discovery.
    pub const PROBE_ORDER: [Self; 5] = [Self::Rad, Self::Ufh, Self::Val, Self::Mix, Self::Ele];

    /// Wire value used by `0005`/`000C`.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Rad => 0x08,
            Self::Ufh => 0x09,
            Self::Val => 0x0A,
            Self::Mix => 0x0B,
            Self::Ele => 0x11,
        }
    }
}

/// One heating zone of a system.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    controller: DeviceId,
    idx: ZoneIdx,
    zone_type: Option<ZoneType>,
    sensor: Option<DeviceId>,
    actuators: BTreeSet<DeviceId>,
    temperature: Option<f64>,
    setpoint: Option<f64>,
    config: Option<ZoneConfig>,
}

impl Zone {
    #[must_use]
    pub fn new(controller: DeviceId, idx: ZoneIdx) -> Self {
        Self {
            controller,
            idx,
            zone_type: None,
            sensor: None,
            actuators: BTreeSet::new(),
            temperature: None,
            setpoint: None,
            config: None,
        }
    }

    #[must_use]
    pub fn idx(&self) -> ZoneIdx {
        self.idx
    }

    #[must_use]
    pub fn controller(&self) -> DeviceId {
        self.controller
    }

    #[must_use]
    pub fn zone_type(&self) -> Option<ZoneType> {
        self.zone_type
    }

    #[must_use]
    pub fn sensor(&self) -> Option<DeviceId> {
        self.sensor
    }

    pub fn actuators(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.actuators.iter().copied()
    }

    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    #[must_use]
    pub fn setpoint(&self) -> Option<f64> {
        self.setpoint
    }

    fn corrupt(
        &self,
        role: Role,
        existing: impl std::fmt::Display,
        attempted: impl std::fmt::Display,
    ) -> CorruptStateError {
        CorruptStateError::new(
            format!("{}/{}", self.controller, self.idx),
            role,
            existing,
            attempted,
        )
    }

    /// Set the zone type.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different type was already set.
    pub fn set_zone_type(&mut self, zone_type: ZoneType) -> Result<(), CorruptStateError> {
        match self.zone_type {
            Some(existing) if existing != zone_type => Err(self.corrupt(
                Role::ZoneType,
                format!("{existing:?}"),
                format!("{zone_type:?}"),
            )),
            _ => {
                self.zone_type = Some(zone_type);
                Ok(())
            }
        }
    }

    /// Check that [`set_sensor`](Self::set_sensor) would succeed.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different sensor is bound.
    pub fn check_sensor(&self, sensor: DeviceId) -> Result<(), CorruptStateError> {
        match self.sensor {
            Some(existing) if existing != sensor => {
                Err(self.corrupt(Role::ZoneSensor, existing, sensor))
            }
            _ => Ok(()),
        }
    }

    /// Bind the zone's sensor. Binding the same sensor again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different sensor is bound.
    pub fn set_sensor(&mut self, sensor: DeviceId) -> Result<(), CorruptStateError> {
        self.check_sensor(sensor)?;
        self.sensor = Some(sensor);
        Ok(())
    }

    /// Parent an actuator to this zone.
    pub fn add_actuator(&mut self, device: DeviceId) {
        self.actuators.insert(device);
    }

    pub fn update_temperature(&mut self, temperature: Option<f64>) {
        self.temperature = temperature;
    }

    pub fn update_setpoint(&mut self, setpoint: Option<f64>) {
        self.setpoint = setpoint;
    }

    pub fn update_config(&mut self, config: ZoneConfig) {
        self.config = Some(config);
    }

    #[must_use]
    pub fn schema(&self) -> Value {
        json!({
            "zone_type": self.zone_type,
            "sensor": self.sensor,
            "actuators": self.actuators,
        })
    }

    #[must_use]
    pub fn params(&self) -> Value {
        json!({
            "min_temp": self.config.map(|c| c.min_temp),
            "max_temp": self.config.map(|c| c.max_temp),
            "local_override": self.config.map(|c| c.local_override),
            "openwindow_function": self.config.map(|c| c.openwindow_function),
        })
    }

    #[must_use]
    pub fn status(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "setpoint": self.setpoint,
        })
    }
}

/// DHW operating mode as last reported by `1F41`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhwModeState {
    pub active: Option<bool>,
    pub mode: String,
    pub until: Option<Timestamp>,
}

/// The stored hot water circuit (`HW`).
#[derive(Debug, Clone, PartialEq)]
pub struct DhwZone {
    controller: DeviceId,
    sensor: Option<DeviceId>,
    dhw_valve: Option<DeviceId>,
    htg_valve: Option<DeviceId>,
    temperature: Option<f64>,
    params: Option<DhwParams>,
    mode: Option<DhwModeState>,
}

impl DhwZone {
    #[must_use]
    pub fn new(controller: DeviceId) -> Self {
        Self {
            controller,
            sensor: None,
            dhw_valve: None,
            htg_valve: None,
            temperature: None,
            params: None,
            mode: None,
        }
    }

    #[must_use]
    pub fn idx(&self) -> ZoneIdx {
        ZoneIdx::Hw
    }

    #[must_use]
    pub fn controller(&self) -> DeviceId {
        self.controller
    }

    #[must_use]
    pub fn sensor(&self) -> Option<DeviceId> {
        self.sensor
    }

    #[must_use]
    pub fn dhw_valve(&self) -> Option<DeviceId> {
        self.dhw_valve
    }

    #[must_use]
    pub fn htg_valve(&self) -> Option<DeviceId> {
        self.htg_valve
    }

    #[must_use]
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    #[must_use]
    pub fn params(&self) -> Option<DhwParams> {
        self.params
    }

    fn bind(
        slot: &mut Option<DeviceId>,
        controller: DeviceId,
        role: Role,
        device: DeviceId,
    ) -> Result<(), CorruptStateError> {
        match *slot {
            Some(existing) if existing != device => Err(CorruptStateError::new(
                format!("{controller}/HW"),
                role,
                existing,
                device,
            )),
            _ => {
                *slot = Some(device);
                Ok(())
            }
        }
    }

    /// Check that a device could take `role` in this circuit.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if the slot holds a different device.
    pub fn check(&self, role: Role, device: DeviceId) -> Result<(), CorruptStateError> {
        let existing = match role {
            Role::DhwSensor => self.sensor,
            Role::DhwValve => self.dhw_valve,
            Role::HeatingValve => self.htg_valve,
            _ => None,
        };
        match existing {
            Some(existing) if existing != device => Err(CorruptStateError::new(
                format!("{}/HW", self.controller),
                role,
                existing,
                device,
            )),
            _ => Ok(()),
        }
    }

    /// Bind the DHW sensor (`07:`).
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different sensor is bound.
    pub fn set_sensor(&mut self, device: DeviceId) -> Result<(), CorruptStateError> {
        Self::bind(&mut self.sensor, self.controller, Role::DhwSensor, device)
    }

    /// Bind the hot water valve (domain `FA`).
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different valve is bound.
    pub fn set_dhw_valve(&mut self, device: DeviceId) -> Result<(), CorruptStateError> {
        Self::bind(&mut self.dhw_valve, self.controller, Role::DhwValve, device)
    }

    /// Bind the heating valve (domain `F9`).
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if a different valve is bound.
    pub fn set_htg_valve(&mut self, device: DeviceId) -> Result<(), CorruptStateError> {
        Self::bind(&mut self.htg_valve, self.controller, Role::HeatingValve, device)
    }

    pub fn update_temperature(&mut self, temperature: Option<f64>) {
        self.temperature = temperature;
    }

    pub fn update_params(&mut self, params: DhwParams) {
        self.params = Some(params);
    }

    pub fn update_mode(&mut self, mode: DhwModeState) {
        self.mode = Some(mode);
    }

    #[must_use]
    pub fn schema(&self) -> Value {
        json!({
            "sensor": self.sensor,
            "dhw_valve": self.dhw_valve,
            "htg_valve": self.htg_valve,
        })
    }

    #[must_use]
    pub fn params_projection(&self) -> Value {
        json!({
            "setpoint": self.params.map(|p| p.setpoint),
            "overrun": self.params.map(|p| p.overrun),
            "differential": self.params.map(|p| p.differential),
        })
    }

    #[must_use]
    pub fn status(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "dhw_mode": self.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctl() -> DeviceId {
        "01:145038".parse().unwrap()
    }

    fn dev(s: &str) -> DeviceId {
        s.parse().unwrap()
    }

    #[test]
    fn should_probe_zone_types_in_fixed_order() {
        let codes: Vec<_> = ZoneType::PROBE_ORDER.iter().map(|t| t.code()).collect();
        assert_eq!(codes, vec![0x08, 0x09, 0x0A, 0x0B, 0x11]);
    }

    #[test]
    fn should_bind_sensor_once() {
        let mut zone = Zone::new(ctl(), ZoneIdx::Zone(1));
        zone.set_sensor(dev("04:056057")).unwrap();
        zone.set_sensor(dev("04:056057")).unwrap();
        let err = zone.set_sensor(dev("04:056061")).unwrap_err();
        assert_eq!(err.role, Role::ZoneSensor);
        assert_eq!(err.owner, "01:145038/01");
        assert_eq!(zone.sensor(), Some(dev("04:056057")));
    }

    #[test]
    fn should_reject_zone_type_change() {
        let mut zone = Zone::new(ctl(), ZoneIdx::Zone(0));
        zone.set_zone_type(ZoneType::Rad).unwrap();
        zone.set_zone_type(ZoneType::Rad).unwrap();
        assert!(zone.set_zone_type(ZoneType::Ufh).is_err());
    }

    #[test]
    fn should_project_zone_schema_and_status() {
        let mut zone = Zone::new(ctl(), ZoneIdx::Zone(0));
        zone.set_zone_type(ZoneType::Ufh).unwrap();
        zone.add_actuator(dev("02:000921"));
        zone.update_temperature(Some(19.5));

        assert_eq!(zone.schema()["zone_type"], "UFH");
        assert_eq!(zone.schema()["actuators"][0], "02:000921");
        assert_eq!(zone.status()["temperature"], 19.5);
        assert!(zone.params()["min_temp"].is_null());
    }

    #[test]
    fn should_bind_each_dhw_slot_independently() {
        let mut dhw = DhwZone::new(ctl());
        dhw.set_sensor(dev("07:045960")).unwrap();
        dhw.set_dhw_valve(dev("13:081807")).unwrap();
        dhw.set_htg_valve(dev("13:106039")).unwrap();

        assert!(dhw.set_dhw_valve(dev("13:106039")).is_err());
        assert!(dhw.check(Role::DhwSensor, dev("07:045960")).is_ok());
        assert!(dhw.check(Role::DhwSensor, dev("07:000001")).is_err());
        assert_eq!(dhw.schema()["htg_valve"], "13:106039");
        assert_eq!(dhw.idx(), ZoneIdx::Hw);
    }
}
