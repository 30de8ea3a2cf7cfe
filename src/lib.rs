//! TankFleet firmware library.
//!
//! Exposes the fleet logic and host adapters for integration testing and
//! for the service binary. Field hardware plugs in by implementing the
//! port traits in [`app::ports`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod alarm;
pub mod app;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fleet;
pub mod power;
pub mod scheduler;
pub mod store;
pub mod time;
