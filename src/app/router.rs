//! Fleet router: the per-role control loop.
//!
//! [`FleetRouter`] owns every piece of device state (config, monitors,
//! scheduler, event log) and exposes a hardware-agnostic API. All I/O
//! flows through port traits injected at call sites, so the whole loop
//! runs against mock adapters in tests.
//!
//! ```text
//!  RelayPort ────▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  SensorPort ───▶ │         FleetRouter          │
//!  RegisterPort ─▶ │ ConfigSync · Alarms · Power  │ ──▶ ActuatorPort
//!  StoragePort ◀──▶│ Forwarder · Scheduler · Log  │
//!                  └──────────────────────────────┘
//! ```
//!
//! One [`tick`](FleetRouter::tick) per wake: feed the watchdog, re-sync
//! time when due, retry any outstanding config apply or ack, expire
//! momentary relays, then run whatever the scheduler says is due.

use core::fmt;
use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::alarm::{LevelChange, LevelState, TankAlarms};
use crate::config::{DeviceConfig, TankConfig};
use crate::diagnostics::{DEFAULT_LOG_CAPACITY, EventLog, LogEntry, LogLevel, RuntimeMetrics};
use crate::error::{Error, ProtocolError, TransportError};
use crate::fleet::config_sync::{ApplyOutcome, ConfigDispatcher, ConfigSyncManager};
use crate::fleet::envelope::{self, CommandEnvelope, CommandKind};
use crate::fleet::forward::{ForwardError, ForwardRequest, RelayAction, RelayBank, RelayForwarder};
use crate::fleet::identity::DeviceId;
use crate::fleet::notefile::Queue;
use crate::fleet::records::{
    AlarmEvent, AlarmKind, ClientStatus, ConfigAck, DEFAULT_SERIAL_ENTRIES, DailyReport,
    FleetSummary, LocationReply, SerialLogReply, SerialRequest, TankLevel, TelemetryRecord,
};
use crate::power::battery::BatteryMonitor;
use crate::power::solar::SolarMonitor;
use crate::scheduler::{MAX_SCHEDULES, Schedule, ScheduleKind, Scheduler, Task};
use crate::store::AtomicStore;
use crate::time::TimeSource;

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{ClockPort, DeviceIo, EventSink, InboundNote, RelayPort, StoragePort};

/// Last fleet summary a viewer received.
pub const SUMMARY_FILE: &str = "fleet_summary.json";

/// How often the server checks for unacknowledged config pushes.
const RESEND_CHECK_SECS: u32 = 60;

const SERVER_QUEUES: [Queue; 7] = [
    Queue::ConfigAck,
    Queue::Alarm,
    Queue::RelayForward,
    Queue::Telemetry,
    Queue::Daily,
    Queue::SerialLog,
    Queue::Location,
];

// ───────────────────────────────────────────────────────────────
// Role
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Field station: samples tanks, raises alarms, obeys commands.
    Client,
    /// Collector: archives client traffic, pushes configs, forwards relays.
    Server,
    /// Passive dashboard fed by the server's fleet summary.
    Viewer,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Client, Self::Server, Self::Viewer]
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
    }

    fn inbound_queues(self) -> &'static [Queue] {
        match self {
            Self::Client => &[Queue::Command],
            Self::Server => &SERVER_QUEUES,
            Self::Viewer => &[Queue::ViewerSummary],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schedules a role runs, with timings taken from `cfg`.
fn schedules(role: Role, cfg: &DeviceConfig) -> heapless::Vec<Schedule, MAX_SCHEDULES> {
    let mut out = heapless::Vec::new();
    let mut add = |label: &'static str, task: Task, kind: ScheduleKind| {
        let _ = out.push(Schedule { label, task, kind });
    };
    let every = |secs: u32| ScheduleKind::Interval { secs };

    add("inbound", Task::PollInbound, every(cfg.effective_inbound_secs()));
    match role {
        Role::Client => {
            add("telemetry", Task::SampleTanks, every(cfg.sample_interval_secs));
            add("battery", Task::PollBattery, every(cfg.battery.poll_interval_secs));
            add("solar", Task::PollSolar, every(cfg.solar.poll_interval_secs));
            add(
                "daily-report",
                Task::DailyReport,
                ScheduleKind::Daily {
                    hour: cfg.report_hour,
                    minute: cfg.report_minute,
                },
            );
        }
        Role::Server => {
            add("config-resend", Task::ResendConfigs, every(RESEND_CHECK_SECS));
            add(
                "viewer-summary",
                Task::PublishSummary,
                every(cfg.server.viewer_summary_interval_secs),
            );
        }
        Role::Viewer => {}
    }
    out
}

// ───────────────────────────────────────────────────────────────
// Server-only state
// ───────────────────────────────────────────────────────────────

struct ServerState {
    dispatcher: ConfigDispatcher,
    forwarder: RelayForwarder,
    clients: BTreeMap<DeviceId, ClientStatus>,
}

impl ServerState {
    fn status_mut(&mut self, client: &DeviceId) -> &mut ClientStatus {
        self.clients
            .entry(client.clone())
            .or_insert_with(|| ClientStatus {
                client: client.clone(),
                site: String::new(),
                last_seen: 0,
                tanks: Vec::new(),
                battery_v: None,
                active_alarms: 0,
                config_version: self.dispatcher.acked_version(client),
            })
    }
}

fn count_active(tanks: &[TankLevel]) -> u32 {
    tanks.iter().filter(|t| t.state != LevelState::Normal).count() as u32
}

// ───────────────────────────────────────────────────────────────
// FleetRouter
// ───────────────────────────────────────────────────────────────

pub struct FleetRouter {
    role: Role,
    me: DeviceId,
    sync: ConfigSyncManager,
    time: TimeSource,
    scheduler: Scheduler,
    event_log: EventLog,
    metrics: RuntimeMetrics,

    // Client
    tank_alarms: TankAlarms,
    latest_levels: Vec<TankLevel>,
    last_reported: Vec<TankLevel>,
    battery: BatteryMonitor,
    solar: SolarMonitor,
    relays: RelayBank,
    alarms_since_report: u32,

    // Server
    server: Option<ServerState>,

    // Viewer
    summary: Option<FleetSummary>,
}

impl FleetRouter {
    /// Build a router for an already known identity, restoring config,
    /// event log and role state from storage.
    pub fn new(role: Role, me: DeviceId, storage: &mut (impl StoragePort + ?Sized)) -> Self {
        let sync = ConfigSyncManager::load(me.clone(), storage);
        let cfg = sync.current().clone();

        let log_capacity = match role {
            Role::Server => usize::from(cfg.server.archive_capacity),
            Role::Client | Role::Viewer => DEFAULT_LOG_CAPACITY,
        };
        let event_log = EventLog::load(storage, log_capacity);

        let server = (role == Role::Server).then(|| ServerState {
            dispatcher: ConfigDispatcher::load(me.clone(), storage),
            forwarder: RelayForwarder::new(me.clone()),
            clients: BTreeMap::new(),
        });
        let summary = if role == Role::Viewer {
            AtomicStore::new(storage).read_json::<FleetSummary>(SUMMARY_FILE).ok()
        } else {
            None
        };

        let mut scheduler = Scheduler::new();
        for s in schedules(role, &cfg) {
            scheduler.add(s);
        }

        Self {
            role,
            me,
            time: TimeSource::new(),
            scheduler,
            event_log,
            metrics: RuntimeMetrics::default(),
            tank_alarms: TankAlarms::new(),
            latest_levels: Vec::new(),
            last_reported: Vec::new(),
            battery: BatteryMonitor::new(&cfg.battery),
            solar: SolarMonitor::new(&cfg.solar, u64::from(cfg.battery.min_alert_interval_secs)),
            relays: RelayBank::new(),
            alarms_since_report: 0,
            server,
            summary,
            sync,
        }
    }

    /// Boot sequence: finish or discard interrupted store writes, fetch
    /// the relay identity, then restore state.
    pub fn boot(
        role: Role,
        io: &mut (impl RelayPort + StoragePort),
        sink: &mut impl EventSink,
    ) -> Result<Self, Error> {
        match AtomicStore::new(io).recover() {
            Ok(r) if !(r.completed.is_empty() && r.discarded.is_empty()) => info!(
                "Router: store recovery completed {} and discarded {} staged file(s)",
                r.completed.len(),
                r.discarded.len()
            ),
            Ok(_) => {}
            Err(e) => warn!("Router: store recovery failed: {}", e),
        }

        let uid = io.device_uid()?;
        let me = DeviceId::new(uid.trim())?;
        let router = Self::new(role, me, io);
        info!(
            "Router: {} {} up, config v{}",
            role,
            router.me,
            router.config().version
        );
        sink.emit(&AppEvent::Started {
            role,
            id: router.me.clone(),
        });
        Ok(router)
    }

    // ── Per-tick orchestration ────────────────────────────────

    pub fn tick(&mut self, io: &mut impl DeviceIo, sink: &mut impl EventSink) {
        self.metrics.ticks += 1;
        io.feed();

        if self.time.sync_if_due(io) {
            if let Some(epoch) = self.time.now_epoch(&*io) {
                sink.emit(&AppEvent::TimeSynced(epoch));
            }
        }
        let now = io.monotonic_ms() / 1000;

        if let Some(version) = self.sync.poll(io) {
            self.on_config_applied(version, io, sink);
        }
        self.relays.expire(now, io);

        let epoch = self.time.now_epoch(&*io);
        for task in self.scheduler.tick(now, epoch) {
            debug!("Router: running {:?}", task);
            match task {
                Task::PollInbound => self.poll_inbound(now, io, sink),
                Task::SampleTanks => self.sample_tanks(now, io, sink),
                Task::PollBattery => self.poll_battery(now, io, sink),
                Task::PollSolar => self.poll_solar(now, io, sink),
                Task::DailyReport => self.send_daily_report(io, sink),
                Task::ResendConfigs => self.resend_configs(now, io),
                Task::PublishSummary => self.publish_summary(io, sink),
            }
        }
    }

    /// Process an operator command. Everything but
    /// [`AppCommand::ClearEventLog`] requires the server role.
    pub fn handle_command(&mut self, cmd: AppCommand, io: &mut impl DeviceIo) -> Result<(), Error> {
        let now = io.monotonic_ms() / 1000;
        if !matches!(cmd, AppCommand::ClearEventLog) && self.server.is_none() {
            warn!("Router: operator command ignored, not a server");
            return Err(Error::Config("operator commands need the server role"));
        }
        match cmd {
            AppCommand::ClearEventLog => {
                info!("Router: clearing event log");
                self.event_log.clear(io).map_err(Error::from)
            }
            AppCommand::PushConfig { target, config } => match self.server.as_mut() {
                Some(server) => server.dispatcher.push(target, config, now, io),
                None => Ok(()),
            },
            AppCommand::RequestSerialLog { target, count } => {
                let body = SerialRequest {
                    count: count.unwrap_or(DEFAULT_SERIAL_ENTRIES),
                };
                let env = CommandEnvelope::with_body(target, CommandKind::SerialRequest, &body)?;
                self.send_command(&env, io)
            }
            AppCommand::RequestLocation { target } => {
                self.send_command(&CommandEnvelope::new(target, CommandKind::LocationRequest), io)
            }
            AppCommand::SwitchRelay { target, action } => {
                let env = CommandEnvelope::with_body(target, CommandKind::Relay, &action)?;
                self.send_command(&env, io)
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> &DeviceId {
        &self.me
    }

    pub fn config(&self) -> &DeviceConfig {
        self.sync.current()
    }

    pub fn config_sync(&self) -> &ConfigSyncManager {
        &self.sync
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn battery(&self) -> &BatteryMonitor {
        &self.battery
    }

    pub fn solar(&self) -> &SolarMonitor {
        &self.solar
    }

    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    pub fn tank_state(&self, tank: u8) -> LevelState {
        self.tank_alarms.state(tank)
    }

    pub fn is_time_synced(&self) -> bool {
        self.time.is_synced()
    }

    /// Server: config dispatcher, `None` for other roles.
    pub fn dispatcher(&self) -> Option<&ConfigDispatcher> {
        self.server.as_ref().map(|s| &s.dispatcher)
    }

    /// Server: latest known status of `client`.
    pub fn client_status(&self, client: &DeviceId) -> Option<&ClientStatus> {
        self.server.as_ref()?.clients.get(client)
    }

    /// Viewer: most recent fleet summary.
    pub fn fleet_summary(&self) -> Option<&FleetSummary> {
        self.summary.as_ref()
    }

    // ── Shared helpers ────────────────────────────────────────

    /// Epoch for record stamps; 0 until the first time sync.
    fn epoch(&self, clock: &impl ClockPort) -> u64 {
        self.time.now_epoch(clock).unwrap_or(0)
    }

    fn log_event(
        &mut self,
        epoch: u64,
        level: LogLevel,
        message: &str,
        storage: &mut (impl StoragePort + ?Sized),
    ) {
        if self
            .event_log
            .record(storage, LogEntry::new(epoch, level, message))
            .is_err()
        {
            self.metrics.store_failures += 1;
        }
    }

    fn send_value(
        &mut self,
        queue: Queue,
        value: &Value,
        relay: &mut impl RelayPort,
    ) -> Result<(), TransportError> {
        match relay.send(&queue.outbound(), value) {
            Ok(()) => {
                self.metrics.notes_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.metrics.send_failures += 1;
                warn!("Router: send on {} failed: {}", queue.outbound(), e);
                Err(e)
            }
        }
    }

    /// Serialize and send `body`; `true` when the relay accepted it.
    fn publish<T: Serialize>(&mut self, queue: Queue, body: &T, relay: &mut impl RelayPort) -> bool {
        match serde_json::to_value(body) {
            Ok(value) => self.send_value(queue, &value, relay).is_ok(),
            Err(e) => {
                warn!("Router: cannot encode {} note: {}", queue.stem(), e);
                false
            }
        }
    }

    fn send_command(&mut self, env: &CommandEnvelope, relay: &mut impl RelayPort) -> Result<(), Error> {
        let doc = envelope::encode(env)?;
        self.send_value(Queue::Command, &doc, relay)?;
        info!("Router: {} command sent to {}", env.kind.as_str(), env.target);
        Ok(())
    }

    fn receive(&mut self, queue: Queue, relay: &mut impl RelayPort) -> Option<InboundNote> {
        match relay.receive(&queue.inbound()) {
            Ok(Some(note)) => {
                self.metrics.notes_received += 1;
                Some(note)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Router: poll of {} failed: {}", queue.inbound(), e);
                None
            }
        }
    }

    fn drop_note(&mut self, queue: Queue, reason: ProtocolError, sink: &mut impl EventSink) {
        self.metrics.protocol_errors += 1;
        warn!("Router: dropped note on {}: {}", queue.inbound(), reason);
        sink.emit(&AppEvent::NoteDropped { queue, reason });
    }

    fn poll_inbound(&mut self, now: u64, io: &mut impl DeviceIo, sink: &mut impl EventSink) {
        let batch = self.config().inbound_batch;
        for &queue in self.role.inbound_queues() {
            for _ in 0..batch {
                let Some(note) = self.receive(queue, io) else {
                    break;
                };
                match self.role {
                    Role::Client => self.on_command_note(note, now, io, sink),
                    Role::Server => self.on_server_note(queue, note, io, sink),
                    Role::Viewer => self.on_summary_note(note, io, sink),
                }
            }
        }
    }

    // ── Client: inbound commands ──────────────────────────────

    fn on_command_note(
        &mut self,
        note: InboundNote,
        now: u64,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) {
        let env = match envelope::decode_for(&note.body, &self.me) {
            Ok(env) => env,
            Err(ProtocolError::WrongTarget) => {
                self.metrics.foreign_dropped += 1;
                debug!("Router: command for another device ignored");
                return;
            }
            Err(e) => return self.drop_note(Queue::Command, e, sink),
        };

        match env.kind {
            CommandKind::Config => self.apply_config(&env, io, sink),
            CommandKind::Relay => match env.body::<RelayAction>() {
                Ok(action) => self.actuate(&action, now, io, sink),
                Err(e) => self.drop_note(Queue::Command, e, sink),
            },
            CommandKind::SerialRequest => match env.body::<SerialRequest>() {
                Ok(req) => self.reply_serial_log(req.count, io),
                Err(e) => self.drop_note(Queue::Command, e, sink),
            },
            CommandKind::LocationRequest => self.reply_location(io),
        }
    }

    fn apply_config(
        &mut self,
        env: &CommandEnvelope,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) {
        match self.sync.on_config_received(env, io) {
            Ok(ApplyOutcome::Applied(version)) => self.on_config_applied(version, io, sink),
            Ok(ApplyOutcome::Reacked(version)) => debug!("Router: config v{} already live", version),
            Err(Error::Protocol(e @ ProtocolError::StaleVersion { .. })) => {
                debug!("Router: config push ignored: {}", e);
            }
            Err(Error::Protocol(e)) => self.drop_note(Queue::Command, e, sink),
            Err(e) => {
                if matches!(e, Error::Storage(_)) {
                    self.metrics.store_failures += 1;
                }
                let epoch = self.epoch(&*io);
                self.log_event(epoch, LogLevel::Warn, &format!("config not applied: {e}"), io);
            }
        }
    }

    /// Push the live config into every component that caches part of it.
    fn on_config_applied(
        &mut self,
        version: u32,
        io: &mut (impl StoragePort + ClockPort),
        sink: &mut impl EventSink,
    ) {
        let cfg = self.sync.current().clone();
        self.battery.set_config(&cfg.battery);
        self.solar.set_config(&cfg.solar);
        self.tank_alarms.retain(&cfg.tanks);
        self.last_reported.retain(|l| cfg.tank(l.tank).is_some());
        for s in schedules(self.role, &cfg) {
            self.scheduler.set_kind(s.task, s.kind);
        }

        let epoch = self.epoch(&*io);
        self.log_event(epoch, LogLevel::Info, &format!("config v{version} applied"), io);
        sink.emit(&AppEvent::ConfigApplied(version));
    }

    fn actuate(
        &mut self,
        action: &RelayAction,
        now: u64,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) {
        match self.relays.apply(action, now, io) {
            Ok(true) => {
                self.metrics.relay_actuations += 1;
                let via = action
                    .via
                    .as_ref()
                    .map_or_else(String::new, |v| format!(" via {v}"));
                let msg = format!(
                    "relay {} {}{}",
                    action.relay,
                    if action.on { "on" } else { "off" },
                    via
                );
                let epoch = self.epoch(&*io);
                self.log_event(epoch, LogLevel::Info, &msg, io);
                sink.emit(&AppEvent::RelayActuated {
                    relay: action.relay,
                    on: action.on,
                });
            }
            Ok(false) => {}
            Err(e) => warn!("Router: relay {} not switched: {}", action.relay, e),
        }
    }

    fn reply_serial_log(&mut self, count: u16, io: &mut (impl RelayPort + ClockPort)) {
        let reply = SerialLogReply {
            client: self.me.clone(),
            epoch: self.epoch(&*io),
            entries: self.event_log.recent(usize::from(count)),
        };
        debug!("Router: returning {} log entries", reply.entries.len());
        self.publish(Queue::SerialLog, &reply, io);
    }

    fn reply_location(&mut self, io: &mut (impl RelayPort + ClockPort)) {
        let location = io.location().unwrap_or_else(|e| {
            warn!("Router: location unavailable: {}", e);
            None
        });
        let reply = LocationReply {
            client: self.me.clone(),
            epoch: self.epoch(&*io),
            location,
        };
        self.publish(Queue::Location, &reply, io);
    }

    // ── Client: scheduled work ────────────────────────────────

    fn sample_tanks(&mut self, now: u64, io: &mut impl DeviceIo, sink: &mut impl EventSink) {
        let cfg = self.sync.current().clone();
        if cfg.tanks.is_empty() {
            debug!("Router: no tanks configured");
            return;
        }
        let samples = io.sample_tanks(&cfg.tanks);
        let epoch = self.epoch(&*io);

        let mut levels = Vec::with_capacity(cfg.tanks.len());
        let mut changed = false;
        for tank in &cfg.tanks {
            let sample = samples.iter().find(|s| s.tank == tank.id);
            let level = sample.filter(|s| s.valid).map(|s| s.level_in);
            if let Some(change) = self.tank_alarms.evaluate(tank, level) {
                changed = true;
                self.on_level_change(tank, &change, now, epoch, io, sink);
            }
            levels.push(TankLevel {
                tank: tank.id,
                level_in: sample.map_or(0.0, |s| s.level_in),
                valid: level.is_some(),
                state: self.tank_alarms.state(tank.id),
            });
        }

        if self.telemetry_due(&levels, changed, cfg.level_change_threshold_in) {
            let record = TelemetryRecord {
                client: self.me.clone(),
                epoch,
                site: cfg.site,
                tanks: levels.clone(),
                battery_v: self.battery.latest().map(|r| r.voltage),
            };
            if self.publish(Queue::Telemetry, &record, io) {
                self.last_reported.clone_from(&levels);
                sink.emit(&AppEvent::TelemetrySent {
                    tanks: levels.len(),
                });
            }
        } else {
            debug!("Router: levels within change threshold, telemetry skipped");
        }
        self.latest_levels = levels;
    }

    /// Telemetry goes out on any alarm transition, when no threshold is
    /// set, or when some tank moved by at least the threshold since the
    /// last report.
    fn telemetry_due(&self, levels: &[TankLevel], changed: bool, threshold: f32) -> bool {
        if changed || threshold <= 0.0 || self.last_reported.len() != levels.len() {
            return true;
        }
        levels.iter().any(|l| {
            self.last_reported
                .iter()
                .find(|r| r.tank == l.tank)
                .is_none_or(|r| r.valid != l.valid || (l.level_in - r.level_in).abs() >= threshold)
        })
    }

    fn on_level_change(
        &mut self,
        tank: &TankConfig,
        change: &LevelChange,
        now: u64,
        epoch: u64,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) {
        let name = if tank.label.is_empty() {
            format!("tank {}", tank.id)
        } else {
            tank.label.clone()
        };
        let detail = match (change.to, change.level_in) {
            (LevelState::High, Some(l)) => format!("{name} high at {l:.1}in"),
            (LevelState::Low, Some(l)) => format!("{name} low at {l:.1}in"),
            (LevelState::Normal, Some(l)) => format!("{name} back to normal at {l:.1}in"),
            _ => format!("{name} sensor fault"),
        };
        self.raise_alarm(
            AlarmEvent {
                client: self.me.clone(),
                epoch,
                tank: Some(tank.id),
                kind: AlarmKind::for_level(change.to),
                value: change.level_in,
                detail,
            },
            io,
            sink,
        );

        let on = match change.to {
            LevelState::High | LevelState::Low => true,
            LevelState::Normal => false,
            LevelState::SensorFault => return,
        };
        let Some(target) = tank.relay_target.clone() else {
            return;
        };
        let action = RelayAction {
            relay: tank.relay_index,
            on,
            duration_secs: None,
            via: None,
        };
        if target == self.me {
            self.actuate(&action, now, io, sink);
            return;
        }
        let request = ForwardRequest {
            requester: self.me.clone(),
            target,
            action,
        };
        if self.publish(Queue::RelayForward, &request, io) {
            info!(
                "Router: asked server to switch relay {} on {}",
                request.action.relay, request.target
            );
        }
    }

    fn raise_alarm(
        &mut self,
        event: AlarmEvent,
        io: &mut (impl RelayPort + StoragePort),
        sink: &mut impl EventSink,
    ) {
        let level = if event.kind.is_clear() {
            LogLevel::Info
        } else {
            self.metrics.alarms_raised += 1;
            self.alarms_since_report += 1;
            LogLevel::Alarm
        };
        self.log_event(event.epoch, level, &event.detail, io);
        self.publish(Queue::Alarm, &event, io);
        sink.emit(&AppEvent::AlarmRaised {
            tank: event.tank,
            kind: event.kind,
        });
    }

    fn poll_battery(&mut self, now: u64, io: &mut impl DeviceIo, sink: &mut impl EventSink) {
        if !self.battery.config().enabled {
            return;
        }
        let Some(raw) = io.battery_voltage() else {
            debug!("Router: no supply voltage reading");
            return;
        };
        let volts = self.battery.calibrate(raw);
        // Monotonic stamps before the first sync; they age out of the
        // window once epoch-stamped readings arrive.
        let stamp = self.time.now_epoch(&*io).unwrap_or(now);
        self.battery.ingest(volts, stamp);

        let epoch = self.epoch(&*io);
        for alert in self.battery.evaluate(now) {
            let detail = format!(
                "{} at {:.2}V ({})",
                alert.description(),
                volts,
                self.battery.describe(volts)
            );
            self.raise_alarm(
                AlarmEvent {
                    client: self.me.clone(),
                    epoch,
                    tank: None,
                    kind: AlarmKind::Battery(alert),
                    value: Some(volts),
                    detail,
                },
                io,
                sink,
            );
        }
    }

    fn poll_solar(&mut self, now: u64, io: &mut impl DeviceIo, sink: &mut impl EventSink) {
        if !self.solar.config().enabled {
            return;
        }
        self.solar.poll(now, io);
        let Some(alert) = self.solar.take_alert(now) else {
            return;
        };
        let event = AlarmEvent {
            client: self.me.clone(),
            epoch: self.epoch(&*io),
            tank: None,
            kind: AlarmKind::Solar(alert),
            value: self.solar.reading().map(|r| r.battery_voltage),
            detail: self.solar.describe_alert(alert),
        };
        self.raise_alarm(event, io, sink);
    }

    fn send_daily_report(&mut self, io: &mut (impl RelayPort + ClockPort), sink: &mut impl EventSink) {
        let cfg = self.sync.current();
        let report = DailyReport {
            client: self.me.clone(),
            epoch: self.epoch(&*io),
            site: cfg.site.clone(),
            tanks: self.latest_levels.clone(),
            battery: (cfg.battery.enabled && cfg.battery.include_in_daily_report)
                .then(|| self.battery.summary())
                .flatten(),
            solar: (cfg.solar.enabled && cfg.solar.include_in_daily_report)
                .then(|| self.solar.summary())
                .flatten(),
            alarm_count: self.alarms_since_report,
            config_version: cfg.version,
        };
        if self.publish(Queue::Daily, &report, io) {
            info!("Router: daily report sent ({} alarms)", report.alarm_count);
            self.alarms_since_report = 0;
            self.solar.reset_daily_stats();
            sink.emit(&AppEvent::DailyReportSent);
        }
    }

    // ── Server ────────────────────────────────────────────────

    fn on_server_note(
        &mut self,
        queue: Queue,
        note: InboundNote,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) {
        if let Err(reason) = self.dispatch_server_note(queue, note, io, sink) {
            self.drop_note(queue, reason, sink);
        }
    }

    fn dispatch_server_note(
        &mut self,
        queue: Queue,
        note: InboundNote,
        io: &mut impl DeviceIo,
        sink: &mut impl EventSink,
    ) -> Result<(), ProtocolError> {
        let body = note.body;
        match queue {
            Queue::Telemetry => self.on_telemetry(parse::<TelemetryRecord>(body)?, io),
            Queue::Alarm => self.on_alarm(parse::<AlarmEvent>(body)?, io),
            Queue::Daily => self.on_daily(parse::<DailyReport>(body)?, io),
            Queue::ConfigAck => self.on_ack(&parse::<ConfigAck>(body)?, io, sink),
            Queue::RelayForward => {
                let request = parse::<ForwardRequest>(body)?;
                self.on_forward(&request, note.sender.as_ref(), io, sink)?;
            }
            Queue::SerialLog => self.on_serial_log(&parse::<SerialLogReply>(body)?),
            Queue::Location => self.on_location(&parse::<LocationReply>(body)?),
            Queue::Command | Queue::ViewerSummary => {}
        }
        Ok(())
    }

    fn on_telemetry(&mut self, record: TelemetryRecord, storage: &mut (impl StoragePort + ?Sized)) {
        let msg = format!(
            "{} telemetry, {} tank(s), {} in alarm",
            record.client,
            record.tanks.len(),
            count_active(&record.tanks)
        );
        self.log_event(record.epoch, LogLevel::Info, &msg, storage);

        let Some(server) = self.server.as_mut() else { return };
        let st = server.status_mut(&record.client);
        if record.epoch < st.last_seen {
            debug!("Router: stale telemetry from {}", record.client);
            return;
        }
        st.last_seen = record.epoch;
        st.site = record.site;
        st.tanks = record.tanks;
        if record.battery_v.is_some() {
            st.battery_v = record.battery_v;
        }
        st.active_alarms = count_active(&st.tanks);
    }

    fn on_alarm(&mut self, alarm: AlarmEvent, storage: &mut (impl StoragePort + ?Sized)) {
        let level = if alarm.kind.is_clear() {
            LogLevel::Info
        } else {
            LogLevel::Alarm
        };
        let msg = format!("{}: {}", alarm.client, alarm.detail);
        self.log_event(alarm.epoch, level, &msg, storage);

        let Some(server) = self.server.as_mut() else { return };
        let st = server.status_mut(&alarm.client);
        if let (Some(tank), Some(state)) = (alarm.tank, alarm.kind.level_state()) {
            if let Some(t) = st.tanks.iter_mut().find(|t| t.tank == tank) {
                t.state = state;
                if let Some(v) = alarm.value {
                    t.level_in = v;
                }
            }
        }
        st.last_seen = st.last_seen.max(alarm.epoch);
        st.active_alarms = count_active(&st.tanks);
    }

    fn on_daily(&mut self, report: DailyReport, storage: &mut (impl StoragePort + ?Sized)) {
        let msg = format!(
            "{} daily report, {} alarm(s), config v{}",
            report.client, report.alarm_count, report.config_version
        );
        self.log_event(report.epoch, LogLevel::Info, &msg, storage);

        let Some(server) = self.server.as_mut() else { return };
        let st = server.status_mut(&report.client);
        if report.epoch >= st.last_seen {
            st.last_seen = report.epoch;
            st.site = report.site;
            st.tanks = report.tanks;
            if let Some(b) = report.battery {
                st.battery_v = Some(b.voltage);
            }
            st.active_alarms = count_active(&st.tanks);
        }
    }

    fn on_ack(
        &mut self,
        ack: &ConfigAck,
        storage: &mut (impl StoragePort + ?Sized),
        sink: &mut impl EventSink,
    ) {
        if ack.target != self.me {
            debug!("Router: ack addressed to {} ignored", ack.target);
            return;
        }
        let Some(server) = self.server.as_mut() else { return };
        server.dispatcher.on_ack(ack, storage);
        let acked = server.dispatcher.acked_version(&ack.client);
        server.status_mut(&ack.client).config_version = acked;
        sink.emit(&AppEvent::ConfigAcked {
            client: ack.client.clone(),
            version: ack.version,
        });
    }

    fn on_forward(
        &mut self,
        request: &ForwardRequest,
        sender: Option<&DeviceId>,
        io: &mut (impl RelayPort + StoragePort + ClockPort),
        sink: &mut impl EventSink,
    ) -> Result<(), ProtocolError> {
        let Some(server) = self.server.as_ref() else {
            return Ok(());
        };
        let env = match server.forwarder.forward(request, sender) {
            Ok(env) => env,
            Err(ForwardError::Encode(e)) => return Err(e),
            Err(e) => {
                self.metrics.protocol_errors += 1;
                let msg = format!("relay request from {} refused: {}", request.requester, e);
                let epoch = self.epoch(&*io);
                self.log_event(epoch, LogLevel::Warn, &msg, io);
                return Ok(());
            }
        };
        let doc = envelope::encode(&env)?;
        if self.send_value(Queue::Command, &doc, io).is_ok() {
            sink.emit(&AppEvent::RelayForwarded {
                requester: request.requester.clone(),
                target: request.target.clone(),
            });
        }
        Ok(())
    }

    fn on_serial_log(&self, reply: &SerialLogReply) {
        info!(
            "Router: {} returned {} log entries",
            reply.client,
            reply.entries.len()
        );
        for e in &reply.entries {
            info!("  [{}] {:?} {}", e.epoch, e.level, e.message);
        }
    }

    fn on_location(&self, reply: &LocationReply) {
        match &reply.location {
            Some(loc) => info!("Router: {} at {:.5},{:.5}", reply.client, loc.lat, loc.lon),
            None => info!("Router: {} has no location fix", reply.client),
        }
    }

    fn resend_configs(&mut self, now: u64, io: &mut (impl RelayPort + StoragePort)) {
        let resend_secs = self.config().server.config_resend_secs;
        if let Some(server) = self.server.as_mut() {
            let sent = server.dispatcher.resend_due(now, resend_secs, io);
            self.metrics.notes_sent += sent as u32;
        }
    }

    fn publish_summary(&mut self, io: &mut (impl RelayPort + ClockPort), sink: &mut impl EventSink) {
        let Some(server) = self.server.as_ref() else { return };
        if server.clients.is_empty() {
            debug!("Router: no clients heard yet, summary skipped");
            return;
        }
        let summary = FleetSummary {
            server: self.me.clone(),
            epoch: self.epoch(&*io),
            clients: server.clients.values().cloned().collect(),
        };
        if self.publish(Queue::ViewerSummary, &summary, io) {
            sink.emit(&AppEvent::SummaryPublished {
                clients: summary.clients.len(),
            });
        }
    }

    // ── Viewer ────────────────────────────────────────────────

    fn on_summary_note(
        &mut self,
        note: InboundNote,
        storage: &mut (impl StoragePort + ?Sized),
        sink: &mut impl EventSink,
    ) {
        let summary = match parse::<FleetSummary>(note.body) {
            Ok(s) => s,
            Err(e) => return self.drop_note(Queue::ViewerSummary, e, sink),
        };
        if self.summary.as_ref().is_some_and(|cur| cur.epoch > summary.epoch) {
            debug!("Router: older fleet summary ignored");
            return;
        }
        if let Err(e) = AtomicStore::new(storage).write_json(SUMMARY_FILE, &summary) {
            warn!("Router: fleet summary not persisted: {}", e);
            self.metrics.store_failures += 1;
        }
        info!(
            "Router: fleet summary from {}, {} client(s)",
            summary.server,
            summary.clients.len()
        );
        sink.emit(&AppEvent::SummaryReceived {
            clients: summary.clients.len(),
        });
        self.summary = Some(summary);
    }
}

fn parse<T: DeserializeOwned>(body: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(body).map_err(|_| ProtocolError::Malformed)
}
