//! Workspace placeholder crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `jomnam-workspace` and
//! enable `desktop-shims` to get the façade with desktop bridge defaults,
//! without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
