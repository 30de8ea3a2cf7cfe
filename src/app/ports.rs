//! Port traits: the hexagonal boundary between fleet logic and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ FleetRouter (domain)
//! ```
//!
//! Driven adapters (relay modem, storage, clock, watchdog, Modbus bus,
//! sensors, relays, event sinks) implement these traits. The
//! [`FleetRouter`](super::router::FleetRouter) consumes them through
//! generics at call sites, so the core never touches a device directly.
//!
//! All port errors are typed; callers handle every variant explicitly.

use serde_json::Value;

use crate::config::{MAX_TANKS, TankConfig};
use crate::error::{PeripheralError, TransportError};
use crate::fleet::identity::DeviceId;
use crate::fleet::notefile::Notefile;
use crate::fleet::records::Location;

// ───────────────────────────────────────────────────────────────
// Relay port (store-and-forward messaging + time/location service)
// ───────────────────────────────────────────────────────────────

/// One note popped from an inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNote {
    pub body: Value,
    /// Originating device when the relay reports it.
    pub sender: Option<DeviceId>,
}

/// The cloud relay as seen through the cellular modem.
///
/// Every call is blocking with a bounded timeout; a timeout is a
/// transient [`TransportError`] and the caller moves on.
pub trait RelayPort {
    /// Relay-assigned identity of this device.
    fn device_uid(&mut self) -> Result<String, TransportError>;

    /// Queue `body` on an outbound notefile. Implementations refuse
    /// inbound names with [`TransportError::Rejected`].
    fn send(&mut self, file: &Notefile, body: &Value) -> Result<(), TransportError>;

    /// Pop the oldest pending note from an inbound notefile.
    fn receive(&mut self, file: &Notefile) -> Result<Option<InboundNote>, TransportError>;

    /// Network time, `None` until the modem has synced.
    fn epoch_secs(&mut self) -> Result<Option<u64>, TransportError>;

    /// Last known position, if the modem has one.
    fn location(&mut self) -> Result<Option<Location>, TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ flash filesystem)
// ───────────────────────────────────────────────────────────────

/// Flat named-file storage. Atomicity is layered on top by
/// [`crate::store`]; implementations only need a real `rename`.
pub trait StoragePort {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or truncate `name` and write `data`. Returns the number of
    /// bytes that reached the medium; fewer than `data.len()` is a short
    /// write.
    fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, StorageError>;

    /// Replace `to` with `from` in one step.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError>;

    /// Delete `name`. `Ok(())` if it did not exist.
    fn remove(&mut self, name: &str) -> Result<(), StorageError>;

    fn exists(&self, name: &str) -> bool;

    /// Every file name currently stored.
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Clock / watchdog
// ───────────────────────────────────────────────────────────────

pub trait ClockPort {
    /// Milliseconds since boot; never goes backwards.
    fn monotonic_ms(&self) -> u64;
}

pub trait WatchdogPort {
    fn feed(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Modbus register port
// ───────────────────────────────────────────────────────────────

pub trait RegisterPort {
    /// Function 0x03: fill `out` with `out.len()` registers from `start`.
    fn read_holding_registers(
        &mut self,
        slave: u8,
        start: u16,
        out: &mut [u16],
    ) -> Result<(), PeripheralError>;
}

// ───────────────────────────────────────────────────────────────
// Sensor / actuator ports
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankSample {
    pub tank: u8,
    pub level_in: f32,
    /// `false` when the sensor reading is out of range or missing.
    pub valid: bool,
}

pub trait SensorPort {
    /// Sample every configured tank.
    fn sample_tanks(&mut self, tanks: &[TankConfig]) -> heapless::Vec<TankSample, MAX_TANKS>;

    /// Raw supply voltage from the modem, before calibration.
    fn battery_voltage(&mut self) -> Option<f32>;
}

pub trait ActuatorPort {
    /// Switch relay `index` (1-based).
    fn set_relay(&mut self, index: u8, on: bool) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / display)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

/// Everything a device needs from its platform, in one bound.
pub trait DeviceIo:
    RelayPort + StoragePort + ClockPort + WatchdogPort + RegisterPort + SensorPort + ActuatorPort
{
}

impl<T> DeviceIo for T where
    T: RelayPort + StoragePort + ClockPort + WatchdogPort + RegisterPort + SensorPort + ActuatorPort
{
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested file does not exist.
    NotFound,
    /// Medium is full.
    Full,
    /// Generic I/O error.
    IoError,
}

/// Errors from [`ActuatorPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// No relay with that index on this board.
    NoSuchRelay(u8),
    /// Driver reported a failure.
    Driver,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "file not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoSuchRelay(i) => write!(f, "no relay {}", i),
            Self::Driver => write!(f, "relay driver failure"),
        }
    }
}
