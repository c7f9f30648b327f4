//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Highest number of zones a controller can have.
pub const MAX_ZONES: u8 = 12;

/// Switches that change how the engine learns about a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Infer unannounced bindings from traffic. When off, bindings come
    /// from explicit schemas and observed traffic is only checked against them.
    pub enable_eavesdrop: bool,
    /// Never emit discovery requests.
    pub disable_discovery: bool,
    /// Zones with an index at or above this are rejected.
    pub max_zones: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_eavesdrop: true,
            disable_discovery: false,
            max_zones: MAX_ZONES,
        }
    }
}
