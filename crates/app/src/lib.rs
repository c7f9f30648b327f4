//! # evohub-app
//!
//! Engine layer: message routing, discovery and relationship inference on
//! top of the pure domain model.
//!
//! ## Responsibilities
//! - Define the **outbound port** the transport implements:
//!   - `CommandSink`: submit a command, optionally get a reply handle
//! - Provide the **driving side** the transport calls into:
//!   - `Registry`: one `System` per controller, shared `DevicePool`
//!   - `System::handle_message`, `System::get_fault_log`, projections
//! - Compose per-profile **capabilities** onto each system through a fixed
//!   `code → capability` dispatch table
//! - Run the **discovery scheduler** and the **relationship inference**
//!   heuristics
//! - Provide **in-process infrastructure** (`OutboundQueue`) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `evohub-domain` only (plus `tokio::sync`/`tokio::time`).
//! Never touches the wire. The transport depends on *this* crate, not the reverse.

pub mod capabilities;
pub mod config;
pub mod devices;
pub mod discovery;
pub mod inference;
pub mod outbound;
pub mod ports;
pub mod registry;
pub mod system;

#[cfg(test)]
mod testing;
