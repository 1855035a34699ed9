//! Ephemeral registry lifecycle.
//!
//! Covers ready-signal parsing, package-manager wiring, process spawning,
//! startup supervision, session storage, and teardown.

pub mod lifecycle;
pub mod npm_config;
pub mod port;
pub mod process;
pub mod session;
pub mod supervisor;
pub mod teardown;
