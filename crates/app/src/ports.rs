//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the engine and the outside world.
//! They are defined here (in `app`) so that both the engine and the
//! transport layer can depend on them without creating circular dependencies.

pub mod command_sink;

pub use command_sink::{CommandHandle, CommandSink};
