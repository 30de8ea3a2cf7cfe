//! Application core: pure domain logic, zero I/O.
//!
//! This module contains the orchestration rules for the fleet: role
//! selection, inbound dispatch, scheduled work and operator commands.
//! All interaction with the modem, flash and peripherals happens through
//! **port traits** defined in [`ports`], keeping this layer fully
//! testable without real hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod router;
