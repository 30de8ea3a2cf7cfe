//! Operator commands to the application core.
//!
//! These represent actions requested from outside the relay (a bench
//! console, a dashboard drop-box) that the
//! [`FleetRouter`](super::router::FleetRouter) interprets and acts upon.
//! All of them except [`AppCommand::ClearEventLog`] are server-only.

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::fleet::forward::RelayAction;
use crate::fleet::identity::DeviceId;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AppCommand {
    /// Deliver a configuration document to a client until it acks.
    PushConfig { target: DeviceId, config: DeviceConfig },

    /// Ask a client for its recent event log.
    RequestSerialLog {
        target: DeviceId,
        #[serde(default)]
        count: Option<u16>,
    },

    /// Ask a client for its last known position.
    RequestLocation { target: DeviceId },

    /// Switch a relay on a client directly.
    SwitchRelay { target: DeviceId, action: RelayAction },

    /// Erase the local event log.
    ClearEventLog,
}
