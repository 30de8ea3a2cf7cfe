//! Configuration delivery and acknowledgement.
//!
//! Client side ([`ConfigSyncManager`]):
//!
//! ```text
//!            config envelope (newer version)
//!   Idle ───────────────────────────────▶ AwaitingApply
//!     ▲                                      │ store write ok
//!     │                                      ▼
//!     │                              Applied(AckPending) ──ack sent──▶ Applied(Acked)
//!     │                                      ▲  │ send failed: retry next poll
//!     └──────────── (next config) ───────────┘──┘
//! ```
//!
//! An ack is sent if and only if the document is durably persisted. The
//! relay delivers at least once, so a duplicate of the stored version is
//! acknowledged again without re-applying it. A duplicate that arrives
//! while a newer document is staged does not leave `AwaitingApply`.
//!
//! Server side ([`ConfigDispatcher`]) keeps every push pending until the
//! matching ack arrives and re-sends it after `config_resend_secs`.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{RelayPort, StoragePort};
use crate::config::{DeviceConfig, validate_config};
use crate::error::{Error, ProtocolError, StoreError};
use crate::fleet::envelope::{self, CommandEnvelope, CommandKind};
use crate::fleet::identity::DeviceId;
use crate::fleet::notefile::Queue;
use crate::fleet::records::ConfigAck;
use crate::store::AtomicStore;

pub const CONFIG_FILE: &str = "device_config.json";
pub const PENDING_FILE: &str = "pending_configs.json";

/// Payload of a `config` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPush {
    /// Server that issued the push; acks are addressed to it.
    pub origin: DeviceId,
    pub config: DeviceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Acked,
    AckPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// A newer document is held in memory; the store write failed and is
    /// retried on the next poll.
    AwaitingApply,
    Applied(AckState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// New version persisted and now live.
    Applied(u32),
    /// Duplicate of the stored version; acknowledged again.
    Reacked(u32),
}

/// Load the persisted configuration, falling back to defaults when it
/// is missing, unreadable or fails validation.
pub fn load_or_default(storage: &mut (impl StoragePort + ?Sized)) -> DeviceConfig {
    match AtomicStore::new(storage).read_json::<DeviceConfig>(CONFIG_FILE) {
        Ok(cfg) => match validate_config(&cfg) {
            Ok(()) => {
                info!("ConfigSync: loaded config v{}", cfg.version);
                cfg
            }
            Err(msg) => {
                warn!("ConfigSync: stored config invalid ({}), using defaults", msg);
                DeviceConfig::default()
            }
        },
        Err(StoreError::NotFound) => {
            info!("ConfigSync: no stored config, using defaults");
            DeviceConfig::default()
        }
        Err(e) => {
            warn!("ConfigSync: stored config unreadable ({}), using defaults", e);
            DeviceConfig::default()
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Client side
// ───────────────────────────────────────────────────────────────

pub struct ConfigSyncManager {
    me: DeviceId,
    current: DeviceConfig,
    state: SyncState,
    /// Document waiting for a successful store write.
    staged: Option<ConfigPush>,
    /// Ack waiting for a successful send.
    unsent_ack: Option<ConfigAck>,
}

impl ConfigSyncManager {
    pub fn new(me: DeviceId, current: DeviceConfig) -> Self {
        Self {
            me,
            current,
            state: SyncState::Idle,
            staged: None,
            unsent_ack: None,
        }
    }

    pub fn load(me: DeviceId, storage: &mut (impl StoragePort + ?Sized)) -> Self {
        Self::new(me, load_or_default(storage))
    }

    pub fn current(&self) -> &DeviceConfig {
        &self.current
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Handle a `config` envelope addressed to this device.
    pub fn on_config_received(
        &mut self,
        env: &CommandEnvelope,
        io: &mut (impl StoragePort + RelayPort),
    ) -> Result<ApplyOutcome, Error> {
        let push: ConfigPush = env.body()?;
        validate_config(&push.config).map_err(|msg| {
            warn!("ConfigSync: rejecting v{}: {}", push.config.version, msg);
            Error::Config(msg)
        })?;

        let stored = self.current.version;
        let received = push.config.version;

        if received == stored && push.config == self.current {
            info!("ConfigSync: duplicate v{}, re-acknowledging", received);
            self.queue_ack(&push.origin, received);
            self.flush_ack(io);
            return Ok(ApplyOutcome::Reacked(received));
        }
        if received <= stored {
            info!("ConfigSync: discarding v{} (stored v{})", received, stored);
            return Err(ProtocolError::StaleVersion { stored, received }.into());
        }
        if let Some(staged) = &self.staged {
            if received < staged.config.version {
                debug!("ConfigSync: v{} older than staged v{}", received, staged.config.version);
                return Err(ProtocolError::StaleVersion {
                    stored: staged.config.version,
                    received,
                }
                .into());
            }
        }

        self.staged = Some(push);
        self.state = SyncState::AwaitingApply;
        self.try_apply(io).map(ApplyOutcome::Applied)
    }

    /// Retry whatever is outstanding. Returns the version if a staged
    /// document was applied by this call.
    pub fn poll(&mut self, io: &mut (impl StoragePort + RelayPort)) -> Option<u32> {
        match self.state {
            SyncState::AwaitingApply => {
                self.flush_ack(io);
                self.try_apply(io).ok()
            }
            SyncState::Applied(AckState::AckPending) => {
                self.flush_ack(io);
                None
            }
            SyncState::Idle | SyncState::Applied(AckState::Acked) => None,
        }
    }

    fn try_apply(&mut self, io: &mut (impl StoragePort + RelayPort)) -> Result<u32, Error> {
        let Some(push) = self.staged.take() else {
            return Err(StoreError::NotFound.into());
        };
        let version = push.config.version;
        if let Err(e) = AtomicStore::new(io).write_json(CONFIG_FILE, &push.config) {
            warn!("ConfigSync: persisting v{} failed ({}), will retry", version, e);
            self.staged = Some(push);
            self.state = SyncState::AwaitingApply;
            return Err(e.into());
        }
        info!("ConfigSync: applied v{}", version);
        self.current = push.config;
        self.queue_ack(&push.origin, version);
        self.flush_ack(io);
        Ok(version)
    }

    fn queue_ack(&mut self, origin: &DeviceId, version: u32) {
        self.unsent_ack = Some(ConfigAck {
            target: origin.clone(),
            client: self.me.clone(),
            version,
        });
        self.state = self.settled(AckState::AckPending);
    }

    /// State after an ack change. A staged document still waiting for its
    /// write keeps the manager in `AwaitingApply`.
    fn settled(&self, ack: AckState) -> SyncState {
        if self.staged.is_some() {
            SyncState::AwaitingApply
        } else {
            SyncState::Applied(ack)
        }
    }

    fn flush_ack(&mut self, relay: &mut impl RelayPort) {
        let Some(ack) = &self.unsent_ack else { return };
        let body = match serde_json::to_value(ack) {
            Ok(v) => v,
            Err(_) => return,
        };
        match relay.send(&Queue::ConfigAck.outbound(), &body) {
            Ok(()) => {
                debug!("ConfigSync: acked v{} to {}", ack.version, ack.target);
                self.unsent_ack = None;
                self.state = self.settled(AckState::Acked);
            }
            Err(e) => warn!("ConfigSync: ack send failed ({}), will retry", e),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Server side
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingPush {
    config: DeviceConfig,
    /// Monotonic seconds of the last send; unset after a reboot so the
    /// push goes out again promptly.
    #[serde(skip)]
    last_sent_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DispatcherState {
    pending: BTreeMap<DeviceId, PendingPush>,
    acked: BTreeMap<DeviceId, u32>,
}

pub struct ConfigDispatcher {
    me: DeviceId,
    state: DispatcherState,
}

impl ConfigDispatcher {
    pub fn load(me: DeviceId, storage: &mut (impl StoragePort + ?Sized)) -> Self {
        let state = match AtomicStore::new(storage).read_json::<DispatcherState>(PENDING_FILE) {
            Ok(s) => {
                info!("ConfigDispatch: {} pending push(es) restored", s.pending.len());
                s
            }
            Err(StoreError::NotFound) => DispatcherState::default(),
            Err(e) => {
                warn!("ConfigDispatch: pending set unreadable ({}), starting empty", e);
                DispatcherState::default()
            }
        };
        Self { me, state }
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }

    pub fn pending_version(&self, client: &DeviceId) -> Option<u32> {
        self.state.pending.get(client).map(|p| p.config.version)
    }

    pub fn acked_version(&self, client: &DeviceId) -> Option<u32> {
        self.state.acked.get(client).copied()
    }

    /// Queue `config` for `target` and send it right away. A send failure
    /// is not an error: the push stays pending and is re-sent later.
    pub fn push(
        &mut self,
        target: DeviceId,
        config: DeviceConfig,
        now_secs: u64,
        io: &mut (impl StoragePort + RelayPort),
    ) -> Result<(), Error> {
        validate_config(&config).map_err(Error::Config)?;
        if let Some(acked) = self.acked_version(&target) {
            if config.version <= acked {
                return Err(ProtocolError::StaleVersion {
                    stored: acked,
                    received: config.version,
                }
                .into());
            }
        }
        let mut pending = PendingPush {
            config,
            last_sent_secs: None,
        };
        if self.send(&target, &pending.config, io) {
            pending.last_sent_secs = Some(now_secs);
        }
        info!("ConfigDispatch: v{} pending for {}", pending.config.version, target);
        self.state.pending.insert(target, pending);
        self.persist(io)
    }

    /// Record an ack. Returns `true` when it settled a pending push.
    pub fn on_ack(&mut self, ack: &ConfigAck, storage: &mut (impl StoragePort + ?Sized)) -> bool {
        if ack.target != self.me {
            debug!("ConfigDispatch: ack for {} ignored", ack.target);
            return false;
        }
        let known = self.state.acked.get(&ack.client).copied().unwrap_or(0);
        self.state.acked.insert(ack.client.clone(), known.max(ack.version));

        let settled = self
            .state
            .pending
            .get(&ack.client)
            .is_some_and(|p| p.config.version <= ack.version);
        if settled {
            self.state.pending.remove(&ack.client);
            info!("ConfigDispatch: {} acked v{}", ack.client, ack.version);
        }
        let _ = self.persist(storage);
        settled
    }

    /// Re-send every push not acknowledged within `resend_secs`.
    pub fn resend_due(
        &mut self,
        now_secs: u64,
        resend_secs: u32,
        io: &mut (impl StoragePort + RelayPort),
    ) -> usize {
        let due: Vec<DeviceId> = self
            .state
            .pending
            .iter()
            .filter(|(_, p)| {
                p.last_sent_secs
                    .is_none_or(|t| now_secs.saturating_sub(t) >= u64::from(resend_secs))
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut sent = 0;
        for target in due {
            let Some(config) = self.state.pending.get(&target).map(|p| p.config.clone()) else {
                continue;
            };
            if self.send(&target, &config, io) {
                if let Some(p) = self.state.pending.get_mut(&target) {
                    p.last_sent_secs = Some(now_secs);
                }
                sent += 1;
            }
        }
        if sent > 0 {
            info!("ConfigDispatch: re-sent {} unacknowledged push(es)", sent);
        }
        sent
    }

    fn send(&self, target: &DeviceId, config: &DeviceConfig, relay: &mut impl RelayPort) -> bool {
        let push = ConfigPush {
            origin: self.me.clone(),
            config: config.clone(),
        };
        let doc = CommandEnvelope::with_body(target.clone(), CommandKind::Config, &push)
            .and_then(|env| envelope::encode(&env));
        let doc = match doc {
            Ok(d) => d,
            Err(e) => {
                warn!("ConfigDispatch: cannot encode push for {}: {}", target, e);
                return false;
            }
        };
        match relay.send(&Queue::Command.outbound(), &doc) {
            Ok(()) => true,
            Err(e) => {
                warn!("ConfigDispatch: send to {} failed: {}", target, e);
                false
            }
        }
    }

    fn persist(&self, storage: &mut (impl StoragePort + ?Sized)) -> Result<(), Error> {
        AtomicStore::new(storage)
            .write_json(PENDING_FILE, &self.state)
            .map_err(Error::from)
    }
}
