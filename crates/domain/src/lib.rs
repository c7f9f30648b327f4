//! # evohub-domain
//!
//! Pure domain model for the evohub inference engine.
//!
//! ## Responsibilities
//! - Foundational types: protocol addresses, zone indexes, error conventions, timestamps
//! - Define **Messages** (immutable observed traffic) and their decoded **Payloads**
//! - Define **Devices**, **Zones** and the **DHW circuit**, with write-once bindings
//! - Define outbound **Commands** and the **discovery** phases that emit them
//! - Define explicit **schemas** for systems whose topology is configured
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app` or IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod command;
pub mod device;
pub mod discovery;
pub mod message;
pub mod payload;
pub mod schema;
pub mod zone;
