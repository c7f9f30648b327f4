//! Heating base state carried by every system: sync cycle, TPI parameters,
//! per-domain demands and the heating-control relay.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use serde_json::{Map, Value, json};

use evohub_domain::command::{Command, DeviceRole};
use evohub_domain::device::{DeviceKind, Parent};
use evohub_domain::error::{CorruptStateError, EvohubError, Role, ValidationError};
use evohub_domain::id::{DeviceId, DomainId};
use evohub_domain::message::{Code, Message};
use evohub_domain::payload::{Payload, TpiParams};
use evohub_domain::time::Timestamp;

use super::{Capability, CapabilityKind, Context};
use crate::discovery::Planned;

const CODES: &[Code] = &[
    Code::SYSTEM_SYNC,
    Code::TPI_PARAMS,
    Code::HEAT_DEMAND,
    Code::RELAY_DEMAND,
    Code::RELAY_FAILSAFE,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSync {
    pub remaining_seconds: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Default)]
pub struct Heating {
    htg_control: Option<DeviceId>,
    sync: Option<SystemSync>,
    tpi_params: Option<TpiParams>,
    heat_demands: BTreeMap<DomainId, f64>,
    relay_demands: BTreeMap<DomainId, f64>,
    device_demands: BTreeMap<DeviceId, f64>,
    relay_failsafes: BTreeMap<DomainId, bool>,
}

impl Heating {
    /// The relay bound as heating control.
    #[must_use]
    pub fn htg_control(&self) -> Option<DeviceId> {
        self.htg_control
    }

    /// The bound relay, or the single attached device with domain `FC`.
    #[must_use]
    pub fn heating_control(&self, ctx: &Context<'_>) -> Option<DeviceId> {
        if self.htg_control.is_some() {
            return self.htg_control;
        }
        let candidates: Vec<_> = ctx
            .pool
            .attached_to(ctx.controller)
            .into_iter()
            .filter(|d| d.domain_id() == Some(DomainId::HEATING_CONTROL))
            .map(|d| d.id())
            .collect();
        match candidates.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Seconds until the next sync, as of the last `1F09`.
    #[must_use]
    pub fn remaining_seconds(&self) -> Option<f64> {
        self.sync.map(|s| s.remaining_seconds)
    }

    #[must_use]
    pub fn tpi_params(&self) -> Option<TpiParams> {
        self.tpi_params
    }

    #[must_use]
    pub fn heat_demand(&self) -> Option<f64> {
        self.heat_demands.get(&DomainId::HEATING_CONTROL).copied()
    }

    /// Whether the heat source is being called for.
    #[must_use]
    pub fn is_calling_for_heat(&self) -> Option<bool> {
        let demand = self
            .htg_control
            .and_then(|relay| self.device_demands.get(&relay))
            .or_else(|| self.relay_demands.get(&DomainId::HEATING_CONTROL))?;
        Some(*demand > 0.0)
    }

    /// Check that `device` could be bound as heating control.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::WrongDeviceKind`] for a device that is not a
    /// relay or OpenTherm bridge, and [`CorruptStateError`] if another relay
    /// is bound or the device is bound elsewhere.
    pub fn check_htg_control(
        &self,
        ctx: &Context<'_>,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        if !matches!(
            DeviceKind::from_type(device.device_type()),
            DeviceKind::Relay | DeviceKind::OpenThermGateway
        ) {
            return Err(ValidationError::WrongDeviceKind {
                device,
                role: Role::HeatingControl,
            }
            .into());
        }
        if let Some(existing) = self.htg_control
            && existing != device
        {
            return Err(CorruptStateError::new(
                ctx.controller,
                Role::HeatingControl,
                existing,
                device,
            )
            .into());
        }
        ctx.pool.check_parent(
            device,
            Parent::System {
                controller: ctx.controller,
            },
            Some(DomainId::HEATING_CONTROL),
        )?;
        Ok(())
    }

    /// Bind the heating-control relay. Binding the same relay again is a no-op.
    ///
    /// # Errors
    ///
    /// See [`check_htg_control`](Self::check_htg_control).
    pub fn set_htg_control(
        &mut self,
        ctx: &Context<'_>,
        device: DeviceId,
    ) -> Result<(), EvohubError> {
        self.check_htg_control(ctx, device)?;
        if self.htg_control == Some(device) {
            return Ok(());
        }
        ctx.pool.set_parent(
            device,
            Parent::System {
                controller: ctx.controller,
            },
            Some(DomainId::HEATING_CONTROL),
        )?;
        self.htg_control = Some(device);
        tracing::info!(controller = %ctx.controller, relay = %device, "bound heating control");
        Ok(())
    }
}

impl Capability for Heating {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Heating
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
        match (msg.code(), msg.payload()) {
            (Code::SYSTEM_SYNC, Payload::SystemSync { remaining_seconds }) if from_controller => {
                self.sync = Some(SystemSync {
                    remaining_seconds: *remaining_seconds,
                    timestamp: msg.timestamp(),
                });
            }
            (Code::TPI_PARAMS, Payload::TpiParams(params)) => {
                self.tpi_params = Some(*params);
            }
            (Code::HEAT_DEMAND, Payload::HeatDemand { domain_id, heat_demand }) => {
                self.heat_demands.insert(*domain_id, *heat_demand);
            }
            (Code::RELAY_DEMAND, Payload::RelayDemand { domain_id, relay_demand }) => {
                if from_controller {
                    self.relay_demands.insert(*domain_id, *relay_demand);
                } else {
                    self.device_demands.insert(msg.src(), *relay_demand);
                }
            }
            (Code::RELAY_FAILSAFE, Payload::RelayFailsafe { domain_id, failsafe_enabled }) => {
                self.relay_failsafes.insert(*domain_id, *failsafe_enabled);
            }
            _ => {}
        }
        Ok(())
    }

    fn discovery(&self, controller: DeviceId) -> Vec<Planned> {
        vec![
            Planned::schema(Command::get_device_list(controller, 0, DeviceRole::HtgControl)),
            Planned::schema(Command::get_device_list(controller, 0, DeviceRole::DhwSensor)),
            Planned::params(Command::get_tpi_params(controller)).every(TimeDelta::hours(4)),
        ]
    }

    fn schema(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        let orphans: Vec<_> = ctx
            .pool
            .attached_to(ctx.controller)
            .into_iter()
            .filter(|d| {
                d.domain_id().is_none() && d.parent().is_none() && d.kind() != DeviceKind::UfhHub
            })
            .map(|d| d.id().to_string())
            .collect();
        out.insert("htg_control".into(), json!(self.heating_control(ctx)));
        out.insert("orphans".into(), json!(orphans));
    }

    fn params(&self, _ctx: &Context<'_>, out: &mut Map<String, Value>) {
        out.insert("tpi_params".into(), json!(self.tpi_params));
    }

    fn status(&self, ctx: &Context<'_>, out: &mut Map<String, Value>) {
        let by_domain = |m: &BTreeMap<DomainId, f64>| -> Map<String, Value> {
            m.iter().map(|(k, v)| (k.to_string(), json!(v))).collect()
        };
        let devices: Vec<_> = ctx
            .pool
            .attached_to(ctx.controller)
            .iter()
            .map(|d| {
                json!({
                    "device_id": d.id(),
                    "kind": d.kind(),
                    "temperature": d.temperature(),
                    "last_seen": d.last_seen(),
                })
            })
            .collect();

        out.insert(
            "system_sync".into(),
            json!(self.sync.map(|s| json!({
                "remaining_seconds": s.remaining_seconds,
                "timestamp": s.timestamp,
            }))),
        );
        out.insert("heat_demand".into(), json!(self.heat_demand()));
        out.insert("heat_demands".into(), Value::Object(by_domain(&self.heat_demands)));
        out.insert("relay_demands".into(), Value::Object(by_domain(&self.relay_demands)));
        out.insert(
            "relay_failsafes".into(),
            Value::Object(
                self.relay_failsafes
                    .iter()
                    .map(|(k, v)| (k.to_string(), json!(v)))
                    .collect(),
            ),
        );
        out.insert("calling_for_heat".into(), json!(self.is_calling_for_heat()));
        out.insert("devices".into(), json!(devices));
    }
}
