//! Device identity assigned by the relay provider.
//!
//! The relay hands every modem a stable unique id (e.g.
//! `dev:864475044204278`). It is the addressing key in command
//! envelopes and is fetched once at boot, then cached by the router.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Maximum identity length accepted.
pub const MAX_DEVICE_ID_LEN: usize = 48;

/// Fixed-capacity identity string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(heapless::String<MAX_DEVICE_ID_LEN>);

impl DeviceId {
    /// Validate and wrap a relay-provided id. Empty, overlong or
    /// whitespace-bearing ids are rejected.
    pub fn new(id: &str) -> Result<Self, ProtocolError> {
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidIdentity);
        }
        let mut s = heapless::String::new();
        s.push_str(id).map_err(|()| ProtocolError::InvalidIdentity)?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}
