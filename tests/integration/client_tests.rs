//! Client role: sampling, alarms, relay requests and inbound commands.

use serde_json::json;

use tankfleet::alarm::LevelState;
use tankfleet::app::commands::AppCommand;
use tankfleet::app::events::AppEvent;
use tankfleet::app::router::{FleetRouter, Role};
use tankfleet::config::{DeviceConfig, TankConfig};
use tankfleet::error::{Error, ProtocolError};
use tankfleet::fleet::config_sync::{CONFIG_FILE, ConfigPush, SyncState};
use tankfleet::fleet::envelope::{self, CommandEnvelope, CommandKind};
use tankfleet::fleet::forward::{ForwardRequest, RelayAction};
use tankfleet::fleet::notefile::Queue;
use tankfleet::fleet::records::{
    AlarmEvent, AlarmKind, ConfigAck, Location, LocationReply, SerialLogReply, SerialRequest,
    TelemetryRecord,
};

use crate::mock_hw::{EPOCH_BASE, MockDevice, RecordingSink, id};

fn tank_config(relay_target: &str) -> DeviceConfig {
    DeviceConfig {
        version: 1,
        site: "north yard".into(),
        tanks: vec![TankConfig {
            id: 1,
            label: "Diesel".into(),
            high_alarm_in: Some(100.0),
            low_alarm_in: Some(10.0),
            hysteresis_in: 2.0,
            relay_target: Some(id(relay_target)),
            relay_index: 2,
        }],
        ..DeviceConfig::default()
    }
}

fn boot_client(dev: &mut MockDevice) -> (FleetRouter, RecordingSink) {
    let mut sink = RecordingSink::new();
    let router = FleetRouter::boot(Role::Client, dev, &mut sink).unwrap();
    (router, sink)
}

fn command(target: &str, kind: CommandKind, body: &impl serde::Serialize) -> serde_json::Value {
    envelope::encode(&CommandEnvelope::with_body(id(target), kind, body).unwrap()).unwrap()
}

fn config_push(target: &str, config: &DeviceConfig) -> serde_json::Value {
    command(
        target,
        CommandKind::Config,
        &ConfigPush {
            origin: id("dev:srv"),
            config: config.clone(),
        },
    )
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn boot_takes_identity_from_relay() {
    let mut dev = MockDevice::new("dev:a");
    let (router, sink) = boot_client(&mut dev);
    assert_eq!(router.id().as_str(), "dev:a");
    assert_eq!(router.role(), Role::Client);
    assert_eq!(
        sink.events[0],
        AppEvent::Started {
            role: Role::Client,
            id: id("dev:a"),
        }
    );
}

#[test]
fn boot_completes_interrupted_config_write() {
    let mut dev = MockDevice::new("dev:a");
    dev.fail_renames = true;
    let mut cfg = tank_config("dev:pump");
    cfg.version = 7;
    let _ = tankfleet::store::AtomicStore::new(&mut dev).write_json(CONFIG_FILE, &cfg);
    dev.fail_renames = false;
    assert!(!dev.files.contains_key(CONFIG_FILE));

    let (router, _) = boot_client(&mut dev);
    assert_eq!(router.config().version, 7);
}

#[test]
fn tick_feeds_watchdog_and_syncs_time() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.feeds, 1);
    assert!(router.is_time_synced());
    assert!(sink.any(|e| *e == AppEvent::TimeSynced(EPOCH_BASE)));
}

// ── Telemetry and alarms ──────────────────────────────────────

#[test]
fn first_tick_reports_levels() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    dev.levels.insert(1, 50.0);
    let (mut router, mut sink) = boot_client(&mut dev);

    router.tick(&mut dev, &mut sink);

    let sent = dev.sent_on(Queue::Telemetry);
    assert_eq!(sent.len(), 1);
    let record: TelemetryRecord = serde_json::from_value(sent[0].clone()).unwrap();
    assert_eq!(record.client, id("dev:a"));
    assert_eq!(record.epoch, EPOCH_BASE);
    assert_eq!(record.site, "north yard");
    assert_eq!(record.tanks[0].level_in, 50.0);
    assert_eq!(record.tanks[0].state, LevelState::Normal);
    assert!(sink.any(|e| *e == AppEvent::TelemetrySent { tanks: 1 }));
    assert!(dev.sent_on(Queue::Alarm).is_empty());
}

#[test]
fn small_level_changes_skip_telemetry_when_threshold_set() {
    let mut dev = MockDevice::new("dev:a");
    let mut cfg = tank_config("dev:pump");
    cfg.level_change_threshold_in = 5.0;
    dev.store_config(&cfg);
    dev.levels.insert(1, 50.0);
    let (mut router, mut sink) = boot_client(&mut dev);

    router.tick(&mut dev, &mut sink);
    dev.levels.insert(1, 52.0);
    dev.advance_secs(u64::from(cfg.sample_interval_secs));
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::Telemetry).len(), 1);

    dev.levels.insert(1, 56.0);
    dev.advance_secs(u64::from(cfg.sample_interval_secs));
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::Telemetry).len(), 2);
}

#[test]
fn high_level_alarms_and_requests_remote_relay() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    dev.levels.insert(1, 120.0);
    let (mut router, mut sink) = boot_client(&mut dev);

    router.tick(&mut dev, &mut sink);

    assert_eq!(router.tank_state(1), LevelState::High);
    let alarms = dev.sent_on(Queue::Alarm);
    assert_eq!(alarms.len(), 1);
    let alarm: AlarmEvent = serde_json::from_value(alarms[0].clone()).unwrap();
    assert_eq!(alarm.kind, AlarmKind::TankHigh);
    assert_eq!(alarm.tank, Some(1));
    assert_eq!(alarm.value, Some(120.0));

    let requests = dev.sent_on(Queue::RelayForward);
    assert_eq!(requests.len(), 1);
    let req: ForwardRequest = serde_json::from_value(requests[0].clone()).unwrap();
    assert_eq!(req.requester, id("dev:a"));
    assert_eq!(req.target, id("dev:pump"));
    assert_eq!(req.action.relay, 2);
    assert!(req.action.on);
    assert!(req.action.via.is_none());
    assert_eq!(router.metrics().alarms_raised, 1);
}

#[test]
fn alarm_holds_inside_hysteresis_then_clears() {
    let mut dev = MockDevice::new("dev:a");
    let cfg = tank_config("dev:pump");
    dev.store_config(&cfg);
    dev.levels.insert(1, 120.0);
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);

    dev.levels.insert(1, 99.0);
    dev.advance_secs(u64::from(cfg.sample_interval_secs));
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.tank_state(1), LevelState::High);
    assert_eq!(dev.sent_on(Queue::Alarm).len(), 1);

    dev.levels.insert(1, 90.0);
    dev.advance_secs(u64::from(cfg.sample_interval_secs));
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.tank_state(1), LevelState::Normal);

    let alarms = dev.sent_on(Queue::Alarm);
    assert_eq!(alarms.len(), 2);
    let clear: AlarmEvent = serde_json::from_value(alarms[1].clone()).unwrap();
    assert_eq!(clear.kind, AlarmKind::TankClear);

    let requests = dev.sent_on(Queue::RelayForward);
    let off: ForwardRequest = serde_json::from_value(requests[1].clone()).unwrap();
    assert!(!off.action.on);
}

#[test]
fn missing_reading_is_a_sensor_fault_without_relay_request() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.tank_state(1), LevelState::SensorFault);
    let alarm: AlarmEvent = serde_json::from_value(dev.sent_on(Queue::Alarm)[0].clone()).unwrap();
    assert_eq!(alarm.kind, AlarmKind::SensorFault);
    assert!(dev.sent_on(Queue::RelayForward).is_empty());
}

#[test]
fn relay_target_on_self_switches_locally() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:a"));
    dev.levels.insert(1, 5.0);
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.tank_state(1), LevelState::Low);
    assert_eq!(dev.relay_calls, vec![(2, true)]);
    assert!(dev.sent_on(Queue::RelayForward).is_empty());
    assert!(router.relays().is_on(2));
}

#[test]
fn failed_sends_are_counted_and_not_fatal() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    dev.levels.insert(1, 50.0);
    dev.fail_sends = true;
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);

    assert!(router.metrics().send_failures >= 1);
    assert!(!sink.any(|e| matches!(e, AppEvent::TelemetrySent { .. })));
}

// ── Configuration ─────────────────────────────────────────────

#[test]
fn config_push_is_persisted_then_acked() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let cfg = tank_config("dev:pump");
    dev.deliver(Queue::Command, config_push("dev:a", &cfg));

    router.tick(&mut dev, &mut sink);

    assert_eq!(router.config().version, 1);
    assert!(sink.any(|e| *e == AppEvent::ConfigApplied(1)));
    let acks = dev.sent_on(Queue::ConfigAck);
    assert_eq!(acks.len(), 1);
    let ack: ConfigAck = serde_json::from_value(acks[0].clone()).unwrap();
    assert_eq!(ack.target, id("dev:srv"));
    assert_eq!(ack.client, id("dev:a"));
    assert_eq!(ack.version, 1);

    let reloaded = FleetRouter::new(Role::Client, id("dev:a"), &mut dev);
    assert_eq!(reloaded.config(), &cfg);
}

#[test]
fn duplicate_push_is_reacked_not_reapplied() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let cfg = tank_config("dev:pump");
    dev.deliver(Queue::Command, config_push("dev:a", &cfg));
    dev.deliver(Queue::Command, config_push("dev:a", &cfg));

    router.tick(&mut dev, &mut sink);

    assert_eq!(dev.sent_on(Queue::ConfigAck).len(), 2);
    let applied = sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::ConfigApplied(_)))
        .count();
    assert_eq!(applied, 1);
}

#[test]
fn older_version_is_ignored() {
    let mut dev = MockDevice::new("dev:a");
    let mut stored = tank_config("dev:pump");
    stored.version = 5;
    dev.store_config(&stored);
    let (mut router, mut sink) = boot_client(&mut dev);

    let mut old = stored.clone();
    old.version = 3;
    old.site = "elsewhere".into();
    dev.deliver(Queue::Command, config_push("dev:a", &old));
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.config().version, 5);
    assert_eq!(router.config().site, "north yard");
    assert!(dev.sent_on(Queue::ConfigAck).is_empty());
}

#[test]
fn invalid_config_is_rejected_without_ack() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let mut bad = tank_config("dev:pump");
    bad.sample_interval_secs = 5;
    dev.deliver(Queue::Command, config_push("dev:a", &bad));
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.config().version, 0);
    assert!(dev.sent_on(Queue::ConfigAck).is_empty());
}

#[test]
fn ack_waits_for_durable_write() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let cfg = tank_config("dev:pump");
    dev.deliver(Queue::Command, config_push("dev:a", &cfg));
    dev.fail_writes = true;

    router.tick(&mut dev, &mut sink);
    assert_eq!(router.config().version, 0);
    assert_eq!(router.config_sync().state(), SyncState::AwaitingApply);
    assert!(dev.sent_on(Queue::ConfigAck).is_empty());

    dev.fail_writes = false;
    dev.advance_secs(1);
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.config().version, 1);
    assert_eq!(dev.sent_on(Queue::ConfigAck).len(), 1);
    assert!(sink.any(|e| *e == AppEvent::ConfigApplied(1)));
}

#[test]
fn duplicate_of_stored_version_keeps_staged_apply_pending() {
    let mut dev = MockDevice::new("dev:a");
    let stored = tank_config("dev:pump");
    dev.store_config(&stored);
    let (mut router, mut sink) = boot_client(&mut dev);
    let inbound = u64::from(stored.inbound_poll_secs);

    let mut newer = stored.clone();
    newer.version = 2;
    newer.site = "south yard".into();
    dev.fail_writes = true;
    dev.deliver(Queue::Command, config_push("dev:a", &newer));
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.config_sync().state(), SyncState::AwaitingApply);

    dev.deliver(Queue::Command, config_push("dev:a", &stored));
    dev.advance_secs(inbound);
    router.tick(&mut dev, &mut sink);
    let ack: ConfigAck =
        serde_json::from_value(dev.sent_on(Queue::ConfigAck)[0].clone()).unwrap();
    assert_eq!(ack.version, 1);
    assert_eq!(router.config_sync().state(), SyncState::AwaitingApply);

    dev.fail_writes = false;
    dev.advance_secs(1);
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.config().version, 2);
    assert_eq!(router.config().site, "south yard");
    assert!(sink.any(|e| *e == AppEvent::ConfigApplied(2)));
    let acks = dev.sent_on(Queue::ConfigAck);
    assert_eq!(acks.len(), 2);
    assert_eq!(acks[1]["version"], 2);
}

#[test]
fn lost_ack_is_retried_on_next_tick() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    dev.deliver(Queue::Command, config_push("dev:a", &tank_config("dev:pump")));
    dev.fail_sends = true;
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.config().version, 1);

    dev.fail_sends = false;
    dev.advance_secs(1);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::ConfigAck).len(), 1);
}

// ── Inbound filtering ─────────────────────────────────────────

#[test]
fn envelopes_for_other_devices_are_ignored() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let action = RelayAction {
        relay: 1,
        on: true,
        duration_secs: None,
        via: None,
    };
    dev.deliver(Queue::Command, command("dev:other", CommandKind::Relay, &action));
    router.tick(&mut dev, &mut sink);

    assert!(dev.relay_calls.is_empty());
    assert_eq!(router.metrics().foreign_dropped, 1);
    assert_eq!(router.metrics().protocol_errors, 0);
}

#[test]
fn malformed_notes_are_dropped_and_reported() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    dev.deliver(Queue::Command, json!("not an object"));
    dev.deliver(Queue::Command, json!({"_target": "dev:a", "_type": "reboot"}));
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.metrics().protocol_errors, 2);
    assert!(sink.any(|e| *e
        == AppEvent::NoteDropped {
            queue: Queue::Command,
            reason: ProtocolError::Malformed,
        }));
    assert!(sink.any(|e| *e
        == AppEvent::NoteDropped {
            queue: Queue::Command,
            reason: ProtocolError::UnknownType,
        }));
}

// ── Relay commands ────────────────────────────────────────────

#[test]
fn momentary_relay_switches_back_off() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let action = RelayAction {
        relay: 1,
        on: true,
        duration_secs: Some(30),
        via: Some(id("dev:srv")),
    };
    dev.deliver(Queue::Command, command("dev:a", CommandKind::Relay, &action));
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.relay_calls, vec![(1, true)]);
    assert!(sink.any(|e| *e == AppEvent::RelayActuated { relay: 1, on: true }));

    dev.advance_secs(10);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.relay_calls.len(), 1);

    dev.advance_secs(25);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.relay_calls, vec![(1, true), (1, false)]);
    assert!(!router.relays().is_on(1));
}

#[test]
fn repeated_relay_command_does_not_reactuate() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, mut sink) = boot_client(&mut dev);
    let action = RelayAction {
        relay: 3,
        on: true,
        duration_secs: None,
        via: None,
    };
    let doc = command("dev:a", CommandKind::Relay, &action);
    dev.deliver(Queue::Command, doc.clone());
    dev.deliver(Queue::Command, doc);
    router.tick(&mut dev, &mut sink);

    assert_eq!(dev.relay_calls, vec![(3, true)]);
    assert_eq!(router.metrics().relay_actuations, 1);
}

// ── Diagnostics requests ──────────────────────────────────────

#[test]
fn serial_request_returns_recent_log() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    dev.levels.insert(1, 120.0);
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);
    assert!(!router.event_log().is_empty());

    dev.deliver(
        Queue::Command,
        command("dev:a", CommandKind::SerialRequest, &SerialRequest { count: 1 }),
    );
    dev.advance_secs(u64::from(router.config().inbound_poll_secs));
    router.tick(&mut dev, &mut sink);

    let replies = dev.sent_on(Queue::SerialLog);
    assert_eq!(replies.len(), 1);
    let reply: SerialLogReply = serde_json::from_value(replies[0].clone()).unwrap();
    assert_eq!(reply.client, id("dev:a"));
    assert_eq!(reply.entries.len(), 1);
    assert!(reply.entries[0].message.contains("Diesel high"));
}

#[test]
fn location_request_returns_modem_fix() {
    let mut dev = MockDevice::new("dev:a");
    dev.location = Some(Location {
        lat: 44.5,
        lon: -93.25,
        fixed_at: None,
    });
    let (mut router, mut sink) = boot_client(&mut dev);
    let doc = envelope::encode(&CommandEnvelope::new(id("dev:a"), CommandKind::LocationRequest))
        .unwrap();
    dev.deliver(Queue::Command, doc);
    router.tick(&mut dev, &mut sink);

    let reply: LocationReply =
        serde_json::from_value(dev.sent_on(Queue::Location)[0].clone()).unwrap();
    assert_eq!(reply.location.map(|l| l.lat), Some(44.5));
}

// ── Operator commands ─────────────────────────────────────────

#[test]
fn server_commands_are_refused_on_clients() {
    let mut dev = MockDevice::new("dev:a");
    let (mut router, _) = boot_client(&mut dev);
    let err = router
        .handle_command(AppCommand::RequestLocation { target: id("dev:b") }, &mut dev)
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(dev.sent.is_empty());
}

#[test]
fn clear_event_log_works_on_any_role() {
    let mut dev = MockDevice::new("dev:a");
    dev.store_config(&tank_config("dev:pump"));
    let (mut router, mut sink) = boot_client(&mut dev);
    router.tick(&mut dev, &mut sink);
    assert!(!router.event_log().is_empty());

    router.handle_command(AppCommand::ClearEventLog, &mut dev).unwrap();
    assert!(router.event_log().is_empty());
}
