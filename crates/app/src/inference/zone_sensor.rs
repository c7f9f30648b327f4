//! Which sensor measures which zone.
//!
//! Each `30C9` cycle the controller broadcasts every zone's temperature, and
//! sensors report theirs on their own. A zone whose temperature changed this
//! cycle, to a value no other changed zone shares, can be matched against the
//! sensors that reported since the previous cycle: exactly one sensor with the
//! same reading is that zone's sensor. Ties and gaps leave the zone unbound
//! until a later cycle.
//!
//! If after that only one zone is left without a sensor, nothing else is
//! sensing it and it changed, the controller itself is assumed to be its
//! sensor.

use std::collections::{BTreeMap, BTreeSet};

use evohub_domain::device::{Device, Parent, is_zone_sensor_capable};
use evohub_domain::id::{DeviceId, ZoneIdx};
use evohub_domain::message::Message;
use evohub_domain::time::{Timestamp, seconds, within};

/// Slack allowed on top of the announced sync interval.
const CYCLE_SLACK_SECS: f64 = 5.0;

/// Readings are decoded to 0.01°C.
const TEMPERATURE_EPSILON: f64 = 0.005;

/// Everything the matcher looks at for one cycle.
#[derive(Debug)]
pub struct ZoneSensorEvidence<'a> {
    pub controller: DeviceId,
    /// The current `30C9` array.
    pub this: &'a Message,
    /// The previous `30C9` array of the same controller.
    pub prev: &'a Message,
    /// From the latest `1F09`.
    pub remaining_seconds: Option<f64>,
    /// Every zone of the system and its current sensor.
    pub zone_sensors: BTreeMap<ZoneIdx, Option<DeviceId>>,
    /// Zones whose sensor inference has been suspended.
    pub suspended: BTreeSet<ZoneIdx>,
    /// Snapshot of the device pool.
    pub devices: &'a [Device],
}

/// A zone/sensor pair the evidence supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorMatch {
    pub zone: ZoneIdx,
    pub sensor: DeviceId,
    /// Bound because nothing else can be the sensor, not by a reading.
    pub by_exclusion: bool,
}

fn same_temperature(a: f64, b: f64) -> bool {
    (a - b).abs() < TEMPERATURE_EPSILON
}

impl ZoneSensorEvidence<'_> {
    /// Zones whose record differs from the previous cycle, with a temperature.
    fn changed_zones(&self) -> Vec<(ZoneIdx, f64)> {
        let (Some(this), Some(prev)) = (
            self.this.payload().zone_temperatures(),
            self.prev.payload().zone_temperatures(),
        ) else {
            return Vec::new();
        };
        this.iter()
            .filter(|z| !prev.contains(z))
            .filter_map(|z| z.temperature.map(|t| (z.zone_idx, t)))
            .collect()
    }

    fn testable_zones(
        &self,
        changed: &[(ZoneIdx, f64)],
        sensors: &BTreeMap<ZoneIdx, Option<DeviceId>>,
    ) -> Vec<(ZoneIdx, f64)> {
        let mut testable: Vec<_> = changed
            .iter()
            .filter(|(idx, _)| matches!(sensors.get(idx), Some(None)))
            .filter(|(idx, _)| !self.suspended.contains(idx))
            .filter(|(idx, temp)| {
                !changed
                    .iter()
                    .any(|(other, t)| other != idx && same_temperature(*t, *temp))
            })
            .copied()
            .collect();
        testable.sort_by_key(|(idx, _)| *idx);
        testable
    }

    /// Sensors that reported a temperature since the previous cycle.
    fn testable_sensors(&self) -> Vec<&Device> {
        let since: Timestamp = self.prev.timestamp();
        self.devices
            .iter()
            .filter(|d| d.id() != self.controller && is_zone_sensor_capable(d.id()))
            .filter(|d| d.controller().is_none_or(|ctl| ctl == self.controller))
            .filter(|d| {
                d.last_reading()
                    .is_some_and(|r| r.temperature.is_some() && r.timestamp > since)
            })
            .collect()
    }

    fn matching<'d>(
        &self,
        sensors: &[&'d Device],
        idx: ZoneIdx,
        temp: f64,
    ) -> Vec<&'d Device> {
        let this_zone = Parent::Zone {
            controller: self.controller,
            idx,
        };
        sensors
            .iter()
            .filter(|d| d.temperature().is_some_and(|t| same_temperature(t, temp)))
            .filter(|d| d.parent().is_none_or(|p| p == this_zone))
            .copied()
            .collect()
    }
}

/// Zone/sensor pairs supported by this cycle, in the order they should be
/// bound (ascending zone index, then any match by exclusion).
#[must_use]
pub fn find_zone_sensors(evidence: &ZoneSensorEvidence<'_>) -> Vec<SensorMatch> {
    let ctl = evidence.controller;
    let mut sensors = evidence.zone_sensors.clone();

    if !sensors.values().any(Option::is_none) {
        tracing::trace!(controller = %ctl, "every zone has a sensor");
        return Vec::new();
    }
    let Some(window) = evidence
        .remaining_seconds
        .and_then(|secs| seconds(secs + CYCLE_SLACK_SECS))
    else {
        tracing::debug!(controller = %ctl, "no usable sync interval");
        return Vec::new();
    };
    if !within(evidence.prev.timestamp(), evidence.this.timestamp(), window) {
        tracing::debug!(controller = %ctl, "missed a cycle, not comparing");
        return Vec::new();
    }

    let changed = evidence.changed_zones();
    let testable = evidence.testable_zones(&changed, &sensors);
    let candidates = evidence.testable_sensors();
    tracing::debug!(
        controller = %ctl,
        changed = changed.len(),
        testable = testable.len(),
        sensors = candidates.len(),
        "matching zone sensors"
    );

    let mut found = Vec::new();
    for (idx, temp) in testable {
        let taken: BTreeSet<_> = sensors.values().flatten().copied().collect();
        let matches: Vec<_> = evidence
            .matching(&candidates, idx, temp)
            .into_iter()
            .filter(|d| !taken.contains(&d.id()))
            .collect();
        match matches.as_slice() {
            [sensor] => {
                found.push(SensorMatch {
                    zone: idx,
                    sensor: sensor.id(),
                    by_exclusion: false,
                });
                sensors.insert(idx, Some(sensor.id()));
            }
            _ => {
                tracing::debug!(zone = %idx, temperature = temp, matches = matches.len(), "zone sensor unresolved");
            }
        }
    }

    let unbound = sensors.values().filter(|s| s.is_none()).count();
    let controller_in_use = sensors.values().any(|s| *s == Some(ctl));
    if unbound <= 1
        && !controller_in_use
        && let [(idx, temp)] = evidence.testable_zones(&changed, &sensors).as_slice()
        && evidence.matching(&candidates, *idx, *temp).is_empty()
    {
        tracing::debug!(zone = %idx, "controller is the only possible sensor");
        found.push(SensorMatch {
            zone: *idx,
            sensor: ctl,
            by_exclusion: true,
        });
    }
    found
}

/// Zones whose bound sensor reported a different temperature this cycle.
#[must_use]
pub fn contradictions(evidence: &ZoneSensorEvidence<'_>) -> Vec<(ZoneIdx, DeviceId)> {
    let candidates = evidence.testable_sensors();
    evidence
        .changed_zones()
        .into_iter()
        .filter_map(|(idx, temp)| {
            let sensor = (*evidence.zone_sensors.get(&idx)?)?;
            let device = candidates.iter().find(|d| d.id() == sensor)?;
            let reading = device.temperature()?;
            (!same_temperature(reading, temp)).then_some((idx, sensor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, id, msg};
    use evohub_domain::message::{Code, Verb};
    use evohub_domain::payload::{Payload, ZoneTemperature};

    const CTL: &str = "01:145038";

    fn zones(temps: &[(u8, Option<f64>)], secs: i64) -> Message {
        msg(
            Code::TEMPERATURE,
            Verb::Information,
            CTL,
            None,
            Payload::ZoneTemperatures {
                zones: temps
                    .iter()
                    .map(|(idx, t)| ZoneTemperature::new(ZoneIdx::Zone(*idx), *t))
                    .collect(),
            },
            at(secs),
        )
    }

    fn sensor(s: &str, temp: f64, secs: i64) -> Device {
        let mut d = Device::new(id(s));
        d.record_reading(Some(temp), at(secs));
        d
    }

    fn unbound(idxs: &[u8]) -> BTreeMap<ZoneIdx, Option<DeviceId>> {
        idxs.iter().map(|i| (ZoneIdx::Zone(*i), None)).collect()
    }

    fn evidence<'a>(
        this: &'a Message,
        prev: &'a Message,
        zone_sensors: BTreeMap<ZoneIdx, Option<DeviceId>>,
        devices: &'a [Device],
    ) -> ZoneSensorEvidence<'a> {
        ZoneSensorEvidence {
            controller: id(CTL),
            this,
            prev,
            remaining_seconds: Some(300.0),
            zone_sensors,
            suspended: BTreeSet::new(),
            devices,
        }
    }

    #[test]
    fn should_bind_unique_changed_zone_to_single_matching_sensor() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let devices = [sensor("04:056057", 20.5, 100)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert_eq!(
            found,
            vec![SensorMatch {
                zone: ZoneIdx::Zone(1),
                sensor: id("04:056057"),
                by_exclusion: false,
            }]
        );
    }

    #[test]
    fn should_not_use_temperature_shared_by_two_changed_zones() {
        let prev = zones(&[(0, Some(20.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(21.5)), (1, Some(21.5))], 180);
        let devices = [sensor("04:056057", 21.5, 100)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_not_compare_across_a_missed_cycle() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 306);
        let devices = [sensor("04:056057", 20.5, 200)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_accept_gap_within_slack() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 305);
        let devices = [sensor("04:056057", 20.5, 200)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert_eq!(found.len(), 1);
    }

    #[test]
    fn should_do_nothing_without_sync_interval() {
        let prev = zones(&[(0, Some(19.0))], 0);
        let this = zones(&[(0, Some(20.5))], 180);
        let devices = [sensor("04:056057", 20.5, 100)];
        let mut ev = evidence(&this, &prev, unbound(&[0, 1]), &devices);
        ev.remaining_seconds = None;

        assert!(find_zone_sensors(&ev).is_empty());
    }

    #[test]
    fn should_do_nothing_with_unusable_sync_interval() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let devices = [sensor("04:056057", 20.5, 100)];

        for secs in [1e17, -1e17, -1.0, f64::NAN] {
            let mut ev = evidence(&this, &prev, unbound(&[0, 1]), &devices);
            ev.remaining_seconds = Some(secs);
            assert!(find_zone_sensors(&ev).is_empty());
        }
    }

    #[test]
    fn should_not_fall_back_while_a_suspended_zone_lacks_a_sensor() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let mut ev = evidence(&this, &prev, unbound(&[0, 1]), &[]);
        ev.suspended.insert(ZoneIdx::Zone(0));

        assert!(find_zone_sensors(&ev).is_empty());
    }

    #[test]
    fn should_ignore_readings_older_than_previous_cycle() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 100);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 280);
        let devices = [sensor("04:056057", 20.5, 50)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_leave_zone_unbound_when_two_sensors_match() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0)), (2, Some(18.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5)), (2, Some(18.0))], 180);
        let devices = [sensor("04:056057", 20.5, 100), sensor("04:056061", 20.5, 120)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1, 2]), &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_skip_sensors_of_another_controller() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let mut other = sensor("04:056057", 20.5, 100);
        other.set_controller(id("01:000001")).unwrap();
        let devices = [other];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_skip_sensor_already_in_another_zone() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0)), (2, Some(17.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5)), (2, Some(17.0))], 180);
        let mut bound = sensor("04:056057", 20.5, 100);
        bound
            .set_parent(
                Parent::Zone {
                    controller: id(CTL),
                    idx: ZoneIdx::Zone(2),
                },
                None,
            )
            .unwrap();
        let devices = [bound];
        let mut sensors = unbound(&[0, 1]);
        sensors.insert(ZoneIdx::Zone(2), Some(id("04:056057")));

        let found = find_zone_sensors(&evidence(&this, &prev, sensors, &devices));

        assert!(found.is_empty());
    }

    #[test]
    fn should_fall_back_to_controller_for_last_unbound_zone() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let mut sensors = unbound(&[1]);
        sensors.insert(ZoneIdx::Zone(0), Some(id("04:056057")));

        let found = find_zone_sensors(&evidence(&this, &prev, sensors, &[]));

        assert_eq!(
            found,
            vec![SensorMatch {
                zone: ZoneIdx::Zone(1),
                sensor: id(CTL),
                by_exclusion: true,
            }]
        );
    }

    #[test]
    fn should_not_fall_back_when_controller_already_senses_a_zone() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.0)), (1, Some(20.5))], 180);
        let mut sensors = unbound(&[1]);
        sensors.insert(ZoneIdx::Zone(0), Some(id(CTL)));

        assert!(find_zone_sensors(&evidence(&this, &prev, sensors, &[])).is_empty());
    }

    #[test]
    fn should_not_fall_back_with_two_zones_unbound() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.5)), (1, Some(20.5))], 180);

        assert!(find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &[])).is_empty());
    }

    #[test]
    fn should_fall_back_after_matching_the_other_zone_in_same_cycle() {
        let prev = zones(&[(0, Some(19.0)), (1, Some(21.0))], 0);
        let this = zones(&[(0, Some(19.5)), (1, Some(20.5))], 180);
        let devices = [sensor("04:056057", 19.5, 100)];

        let found = find_zone_sensors(&evidence(&this, &prev, unbound(&[0, 1]), &devices));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sensor, id("04:056057"));
        assert_eq!(found[1].zone, ZoneIdx::Zone(1));
        assert!(found[1].by_exclusion);
    }

    #[test]
    fn should_report_bound_sensor_disagreeing_with_zone() {
        let prev = zones(&[(0, Some(19.0))], 0);
        let this = zones(&[(0, Some(20.5))], 180);
        let devices = [sensor("04:056057", 22.0, 100)];
        let mut sensors = BTreeMap::new();
        sensors.insert(ZoneIdx::Zone(0), Some(id("04:056057")));

        let found = contradictions(&evidence(&this, &prev, sensors, &devices));

        assert_eq!(found, vec![(ZoneIdx::Zone(0), id("04:056057"))]);
    }
}
