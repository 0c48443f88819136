//! Daemon configuration.
//!
//! Only the daemon's own knobs live here (where the config directory is,
//! which port to bind, timers and timeouts). The spoofing settings the daemon
//! manages are in [`crate::store`].
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{ConfigOverrides, DaemonConfig, Resolved, ValueSource, resolve_config};
pub use schema::{ConfigFile, DEFAULT_CONFIG_DIR};
