//! Cross-client relay control through the server.
//!
//! Clients cannot reach each other directly. A client that wants a relay
//! switched on another client posts a [`ForwardRequest`] on
//! `relay_forward.qo`; the server re-wraps the action as a `relay`
//! envelope addressed to the target on the shared command queue.
//!
//! ```text
//!  client A ──relay_forward──▶ server ──command {_target: B, _via: S}──▶ client B
//! ```
//!
//! Loops are cut at the server: a request aimed at its own requester, a
//! request whose requester is not the device that sent it, and an action
//! that was already forwarded once (`_via` present) are all refused.

use core::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ActuatorError, ActuatorPort};
use crate::error::ProtocolError;
use crate::fleet::envelope::{CommandEnvelope, CommandKind};
use crate::fleet::identity::DeviceId;

/// Relays per client board.
pub const MAX_RELAYS: usize = 4;

/// Body of a `relay` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayAction {
    /// 1-based relay index.
    pub relay: u8,
    pub on: bool,
    /// Momentary activation: switch back off after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    /// Server that forwarded this action, if any.
    #[serde(rename = "_via", default, skip_serializing_if = "Option::is_none")]
    pub via: Option<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRequest {
    pub requester: DeviceId,
    pub target: DeviceId,
    pub action: RelayAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardError {
    /// Requester and target are the same device.
    SelfTarget,
    /// Claimed requester differs from the device that sent the note.
    SenderMismatch,
    /// The action was already forwarded once.
    AlreadyForwarded,
    Encode(ProtocolError),
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfTarget => write!(f, "requester is the target"),
            Self::SenderMismatch => write!(f, "requester does not match sender"),
            Self::AlreadyForwarded => write!(f, "action already forwarded"),
            Self::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

impl From<ProtocolError> for ForwardError {
    fn from(e: ProtocolError) -> Self {
        Self::Encode(e)
    }
}

/// Server-side forwarding policy.
pub struct RelayForwarder {
    me: DeviceId,
}

impl RelayForwarder {
    pub fn new(me: DeviceId) -> Self {
        Self { me }
    }

    /// Turn a request into a `relay` envelope for its target, stamped
    /// with this server's id. `sender` is the inbound note's origin when
    /// the relay reports it.
    pub fn forward(
        &self,
        request: &ForwardRequest,
        sender: Option<&DeviceId>,
    ) -> Result<CommandEnvelope, ForwardError> {
        if request.requester == request.target {
            warn!("Forward: {} asked to switch itself, dropped", request.requester);
            return Err(ForwardError::SelfTarget);
        }
        if let Some(sender) = sender {
            if *sender != request.requester {
                warn!(
                    "Forward: request claims {} but came from {}, dropped",
                    request.requester, sender
                );
                return Err(ForwardError::SenderMismatch);
            }
        }
        if let Some(via) = &request.action.via {
            warn!("Forward: action already forwarded via {}, dropped", via);
            return Err(ForwardError::AlreadyForwarded);
        }

        let mut action = request.action.clone();
        action.via = Some(self.me.clone());
        let env = CommandEnvelope::with_body(request.target.clone(), CommandKind::Relay, &action)?;
        info!(
            "Forward: {} -> {} relay {} {}",
            request.requester,
            request.target,
            action.relay,
            if action.on { "ON" } else { "OFF" }
        );
        Ok(env)
    }
}

// ───────────────────────────────────────────────────────────────
// Client-side actuation
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RelaySlot {
    /// Last commanded state; `None` until the first command since boot.
    on: Option<bool>,
    /// Monotonic second at which a momentary activation ends.
    off_at: Option<u64>,
}

/// Tracks commanded relay state so repeated commands do not re-actuate.
#[derive(Debug, Default)]
pub struct RelayBank {
    slots: [RelaySlot; MAX_RELAYS],
}

impl RelayBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, relay: u8) -> bool {
        self.slot(relay).is_some_and(|s| s.on == Some(true))
    }

    /// Apply an action. Returns `Ok(true)` if the actuator was driven,
    /// `Ok(false)` if the relay was already in the requested state.
    pub fn apply(
        &mut self,
        action: &RelayAction,
        now_secs: u64,
        hw: &mut impl ActuatorPort,
    ) -> Result<bool, ActuatorError> {
        let idx = usize::from(action.relay)
            .checked_sub(1)
            .filter(|i| *i < MAX_RELAYS)
            .ok_or(ActuatorError::NoSuchRelay(action.relay))?;
        let slot = &mut self.slots[idx];

        // A pulse in progress is not extended by a repeat of itself.
        if action.on && action.duration_secs.is_some() && slot.on == Some(true) && slot.off_at.is_some() {
            debug!("Relay {}: momentary activation already running", action.relay);
            return Ok(false);
        }
        slot.off_at = match (action.on, action.duration_secs) {
            (true, Some(d)) => Some(now_secs + u64::from(d)),
            _ => None,
        };
        if slot.on == Some(action.on) {
            debug!("Relay {}: already {}", action.relay, on_off(action.on));
            return Ok(false);
        }
        hw.set_relay(action.relay, action.on)?;
        slot.on = Some(action.on);
        info!("Relay {}: {}", action.relay, on_off(action.on));
        Ok(true)
    }

    /// Switch off momentary relays whose time is up. Returns how many.
    pub fn expire(&mut self, now_secs: u64, hw: &mut impl ActuatorPort) -> usize {
        let mut n = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(off_at) = slot.off_at else { continue };
            if now_secs < off_at {
                continue;
            }
            let relay = (i + 1) as u8;
            match hw.set_relay(relay, false) {
                Ok(()) => {
                    info!("Relay {}: momentary period ended", relay);
                    slot.on = Some(false);
                    slot.off_at = None;
                    n += 1;
                }
                Err(e) => warn!("Relay {}: auto-off failed: {}", relay, e),
            }
        }
        n
    }

    fn slot(&self, relay: u8) -> Option<&RelaySlot> {
        usize::from(relay).checked_sub(1).and_then(|i| self.slots.get(i))
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}
