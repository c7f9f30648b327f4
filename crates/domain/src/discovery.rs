//! Discovery phases.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Which kinds of discovery requests an entity should emit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DiscoveryFlags: u8 {
        /// Topology: which zones and devices exist.
        const SCHEMA = 1 << 0;
        /// Configuration: TPI, modes, zone limits.
        const PARAMS = 1 << 1;
        /// Live values: temperatures, sync, faults.
        const STATUS = 1 << 2;
        const ALL = Self::SCHEMA.bits() | Self::PARAMS.bits() | Self::STATUS.bits();
    }
}

impl Default for DiscoveryFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Progress of one entity's discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    Uninitialized,
    SchemaRequested,
    ParamsRequested,
    StatusRequested,
    Steady,
}

impl DiscoveryPhase {
    /// The phase reached once the requests of `flag` have been emitted.
    #[must_use]
    pub fn after(flag: DiscoveryFlags) -> Self {
        if flag.contains(DiscoveryFlags::STATUS) {
            Self::StatusRequested
        } else if flag.contains(DiscoveryFlags::PARAMS) {
            Self::ParamsRequested
        } else if flag.contains(DiscoveryFlags::SCHEMA) {
            Self::SchemaRequested
        } else {
            Self::Uninitialized
        }
    }
}
