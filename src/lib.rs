#![forbid(unsafe_code)]

//! Ephemeral local package registry orchestration for end-to-end tests.
//!
//! [`LocalRegistry`] launches a throwaway registry, waits for it to
//! announce its port, points npm and yarn at it, and tears it down again.
//! [`hooks`] exposes the same lifecycle as global setup/teardown functions.

pub mod config;
pub mod errors;
pub mod hooks;
pub mod registry;

pub use config::RegistryConfig;
pub use errors::{AppError, Result};
pub use hooks::LocalRegistry;
pub use registry::process::StartOptions;
pub use registry::session::SessionInfo;
pub use registry::teardown::TeardownReport;
