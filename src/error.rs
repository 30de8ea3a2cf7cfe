//! Unified error taxonomy for the fleet firmware.
//!
//! Every fallible operation in the core funnels into [`Error`]; the
//! variant tells the control loop how to react:
//!
//! | Variant     | Reaction                                              |
//! |-------------|-------------------------------------------------------|
//! | `Transport` | transient, retried on the next scheduled cycle        |
//! | `Peripheral`| counted, degrades after a consecutive-failure streak  |
//! | `Storage`   | previous data preserved, caller must not assume apply |
//! | `Protocol`  | discarded with a log entry, never fatal               |
//! | `Config`    | rejected document, running config unchanged           |
//!
//! All variants are `Copy` so they pass through the router without
//! allocation.

use core::fmt;

use crate::fleet::notefile::NotefileError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Transport(TransportError),
    Peripheral(PeripheralError),
    Storage(StoreError),
    Protocol(ProtocolError),
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Peripheral(e) => write!(f, "peripheral: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport (relay I/O)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Request to the relay modem did not complete within its timeout.
    Timeout,
    /// The relay (or the modem) is not reachable right now.
    Unreachable,
    /// The modem answered with an error response.
    Rejected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "relay request timed out"),
            Self::Unreachable => write!(f, "relay unreachable"),
            Self::Rejected => write!(f, "relay rejected request"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Peripheral (Modbus, sensors)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralError {
    /// No response within the per-read timeout.
    Timeout,
    /// Response frame failed its CRC check.
    Crc,
    /// Response was well-formed but not what was asked for.
    BadResponse,
    /// Device answered with a Modbus exception code.
    Exception(u8),
    /// Underlying link (UART / RS-485) failed.
    Link,
}

impl fmt::Display for PeripheralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "read timed out"),
            Self::Crc => write!(f, "CRC mismatch"),
            Self::BadResponse => write!(f, "unexpected response"),
            Self::Exception(code) => write!(f, "device exception 0x{code:02X}"),
            Self::Link => write!(f, "link failure"),
        }
    }
}

impl From<PeripheralError> for Error {
    fn from(e: PeripheralError) -> Self {
        Self::Peripheral(e)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Document does not exist.
    NotFound,
    /// Stored frame failed length or digest verification.
    Corrupted,
    /// Staging write errored or came up short; original untouched.
    WriteFailed,
    /// Staging file complete but could not be renamed into place.
    /// The `.tmp` file is kept for recovery on boot.
    RenameFailed,
    /// Document name is not acceptable to the store.
    InvalidName,
    /// Generic I/O error from the backend.
    Io,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "document not found"),
            Self::Corrupted => write!(f, "document corrupted"),
            Self::WriteFailed => write!(f, "staging write failed"),
            Self::RenameFailed => write!(f, "rename into place failed"),
            Self::InvalidName => write!(f, "invalid document name"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Document is not a JSON object or fails to deserialize.
    Malformed,
    /// A required field is absent or has the wrong JSON type.
    MissingField(&'static str),
    /// `_type` names no known command.
    UnknownType,
    /// Payload tries to use a reserved envelope key.
    ReservedKey,
    /// Envelope addressed to another device.
    WrongTarget,
    /// Device identity string is empty or too long.
    InvalidIdentity,
    /// Config version is not newer than the stored one.
    StaleVersion { stored: u32, received: u32 },
    /// Queue name violates the notefile naming rules.
    Notefile(NotefileError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed document"),
            Self::MissingField(name) => write!(f, "missing field '{name}'"),
            Self::UnknownType => write!(f, "unknown command type"),
            Self::ReservedKey => write!(f, "payload uses a reserved key"),
            Self::WrongTarget => write!(f, "addressed to another device"),
            Self::InvalidIdentity => write!(f, "invalid device identity"),
            Self::StaleVersion { stored, received } => {
                write!(f, "stale version {received} (stored {stored})")
            }
            Self::Notefile(e) => write!(f, "notefile: {e}"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<NotefileError> for ProtocolError {
    fn from(e: NotefileError) -> Self {
        Self::Notefile(e)
    }
}

impl From<NotefileError> for Error {
    fn from(e: NotefileError) -> Self {
        Self::Protocol(ProtocolError::Notefile(e))
    }
}

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
