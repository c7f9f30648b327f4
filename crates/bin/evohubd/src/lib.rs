//! # evohubd: evohub daemon
//!
//! Composition root that wires the engine to a traffic source.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Install the `tracing` subscriber
//! - Construct the `Registry` and its `OutboundQueue`, apply configured schemas
//! - Replay JSON-lines traffic, write commands, print final projections
//! - Handle graceful shutdown (Ctrl-C)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no inference logic belongs here.

pub mod config;
pub mod replay;
