//! Device pool: every device heard, shared by all systems.
//!
//! Systems of different controllers only share this pool. Readers work on a
//! cloned snapshot; the write lock is held only for single updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use evohub_domain::device::{Device, Parent};
use evohub_domain::error::CorruptStateError;
use evohub_domain::id::{DeviceId, DomainId};
use evohub_domain::time::Timestamp;

#[derive(Debug, Clone, Default)]
pub struct DevicePool {
    inner: Arc<RwLock<BTreeMap<DeviceId, Device>>>,
}

impl DevicePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `id` is known, creating it on first sight.
    pub fn ensure(&self, id: DeviceId) {
        self.inner
            .write()
            .entry(id)
            .or_insert_with(|| Device::new(id));
    }

    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.inner.read().get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: DeviceId) -> bool {
        self.inner.read().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// A point-in-time copy of every device.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Device> {
        self.inner.read().values().cloned().collect()
    }

    /// Devices attached to `controller`, excluding the controller itself.
    #[must_use]
    pub fn attached_to(&self, controller: DeviceId) -> Vec<Device> {
        self.inner
            .read()
            .values()
            .filter(|d| d.id() != controller && d.controller() == Some(controller))
            .cloned()
            .collect()
    }

    pub fn touch(&self, id: DeviceId, ts: Timestamp) {
        self.inner
            .write()
            .entry(id)
            .or_insert_with(|| Device::new(id))
            .touch(ts);
    }

    pub fn record_reading(&self, id: DeviceId, temperature: Option<f64>, ts: Timestamp) {
        self.inner
            .write()
            .entry(id)
            .or_insert_with(|| Device::new(id))
            .record_reading(temperature, ts);
    }

    /// Attach `id` to `controller` unless it is already attached.
    ///
    /// Returns whether the device was newly attached.
    pub fn attach(&self, id: DeviceId, controller: DeviceId) -> bool {
        let mut devices = self.inner.write();
        let device = devices.entry(id).or_insert_with(|| Device::new(id));
        if device.controller().is_some() {
            return false;
        }
        device.set_controller(controller).is_ok()
    }

    /// Check that `id` could be bound to `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if the device is bound elsewhere.
    pub fn check_parent(
        &self,
        id: DeviceId,
        parent: Parent,
        domain_id: Option<DomainId>,
    ) -> Result<(), CorruptStateError> {
        match self.inner.read().get(&id) {
            Some(device) => device.check_parent(parent, domain_id),
            None => Ok(()),
        }
    }

    /// Bind `id` to `parent`, creating the device if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CorruptStateError`] if the device is bound elsewhere.
    pub fn set_parent(
        &self,
        id: DeviceId,
        parent: Parent,
        domain_id: Option<DomainId>,
    ) -> Result<(), CorruptStateError> {
        self.inner
            .write()
            .entry(id)
            .or_insert_with(|| Device::new(id))
            .set_parent(parent, domain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evohub_domain::id::ZoneIdx;

    fn id(s: &str) -> DeviceId {
        s.parse().unwrap()
    }

    #[test]
    fn should_create_device_once() {
        let pool = DevicePool::new();
        pool.ensure(id("04:056057"));
        pool.ensure(id("04:056057"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn should_keep_first_attachment() {
        let pool = DevicePool::new();
        assert!(pool.attach(id("04:056057"), id("01:000001")));
        assert!(!pool.attach(id("04:056057"), id("01:000002")));
        assert_eq!(
            pool.get(id("04:056057")).unwrap().controller(),
            Some(id("01:000001"))
        );
    }

    #[test]
    fn should_list_attached_devices_without_controller() {
        let pool = DevicePool::new();
        let ctl = id("01:145038");
        pool.ensure(ctl);
        pool.attach(id("13:237335"), ctl);
        pool.attach(id("04:056057"), id("01:000001"));

        let attached: Vec<_> = pool.attached_to(ctl).iter().map(Device::id).collect();
        assert_eq!(attached, vec![id("13:237335")]);
    }

    #[test]
    fn should_share_state_between_clones() {
        let pool = DevicePool::new();
        let other = pool.clone();
        let ts = evohub_domain::time::now();
        other.record_reading(id("04:056057"), Some(20.5), ts);
        assert_eq!(pool.get(id("04:056057")).unwrap().temperature(), Some(20.5));
    }

    #[test]
    fn should_reject_conflicting_parent() {
        let pool = DevicePool::new();
        let ctl = id("01:145038");
        let zone = |idx| Parent::Zone {
            controller: ctl,
            idx: ZoneIdx::Zone(idx),
        };
        pool.set_parent(id("04:056057"), zone(0), None).unwrap();
        assert!(pool.check_parent(id("04:056057"), zone(0), None).is_ok());
        assert!(pool.set_parent(id("04:056057"), zone(1), None).is_err());
    }
}
