//! Outbound application events.
//!
//! The [`FleetRouter`](super::router::FleetRouter) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other
//! side decide what to do with them: log to the console, drive a status
//! display, feed a bench harness.

use crate::error::ProtocolError;
use crate::fleet::identity::DeviceId;
use crate::fleet::notefile::Queue;
use crate::fleet::records::AlarmKind;

use super::router::Role;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The router finished booting.
    Started { role: Role, id: DeviceId },

    /// Wall-clock time was (re)anchored to the relay's network time.
    TimeSynced(u64),

    /// A configuration version is persisted and live.
    ConfigApplied(u32),

    /// Telemetry for this many tanks went out.
    TelemetrySent { tanks: usize },

    /// An alarm (or its clearing) was sent to the server.
    AlarmRaised { tank: Option<u8>, kind: AlarmKind },

    /// A local relay changed state.
    RelayActuated { relay: u8, on: bool },

    /// Server: a relay request was passed on to its target.
    RelayForwarded { requester: DeviceId, target: DeviceId },

    /// Daily report went out.
    DailyReportSent,

    /// Server: a client acknowledged a configuration version.
    ConfigAcked { client: DeviceId, version: u32 },

    /// Server: fleet summary published for viewers.
    SummaryPublished { clients: usize },

    /// Viewer: a newer fleet summary arrived.
    SummaryReceived { clients: usize },

    /// An inbound note was discarded.
    NoteDropped { queue: Queue, reason: ProtocolError },
}
