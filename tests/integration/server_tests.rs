//! Server and viewer roles: archive, config dispatch, forwarding, summary.

use serde_json::json;

use tankfleet::alarm::LevelState;
use tankfleet::app::commands::AppCommand;
use tankfleet::app::events::AppEvent;
use tankfleet::app::router::{FleetRouter, Role, SUMMARY_FILE};
use tankfleet::config::DeviceConfig;
use tankfleet::error::ProtocolError;
use tankfleet::fleet::envelope::{self, CommandKind};
use tankfleet::fleet::forward::{ForwardRequest, RelayAction};
use tankfleet::fleet::notefile::Queue;
use tankfleet::fleet::records::{
    AlarmEvent, AlarmKind, ClientStatus, ConfigAck, FleetSummary, TankLevel, TelemetryRecord,
};

use crate::mock_hw::{EPOCH_BASE, MockDevice, RecordingSink, id};

fn boot(role: Role, dev: &mut MockDevice) -> (FleetRouter, RecordingSink) {
    let mut sink = RecordingSink::new();
    let router = FleetRouter::boot(role, dev, &mut sink).unwrap();
    (router, sink)
}

fn level(tank: u8, level_in: f32, state: LevelState) -> TankLevel {
    TankLevel {
        tank,
        level_in,
        valid: true,
        state,
    }
}

fn telemetry(client: &str, epoch: u64, tanks: Vec<TankLevel>) -> TelemetryRecord {
    TelemetryRecord {
        client: id(client),
        epoch,
        site: "yard".into(),
        tanks,
        battery_v: Some(12.6),
    }
}

fn forward_request(requester: &str, target: &str, via: Option<&str>) -> ForwardRequest {
    ForwardRequest {
        requester: id(requester),
        target: id(target),
        action: RelayAction {
            relay: 2,
            on: true,
            duration_secs: None,
            via: via.map(id),
        },
    }
}

fn pushed_config(version: u32) -> DeviceConfig {
    DeviceConfig {
        version,
        site: "south".into(),
        ..DeviceConfig::default()
    }
}

// ── Archive / client status ───────────────────────────────────

#[test]
fn telemetry_updates_client_status_and_archive() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    dev.deliver_json(
        Queue::Telemetry,
        &telemetry("dev:a", EPOCH_BASE - 60, vec![level(1, 120.0, LevelState::High)]),
    );
    router.tick(&mut dev, &mut sink);

    let st = router.client_status(&id("dev:a")).unwrap();
    assert_eq!(st.last_seen, EPOCH_BASE - 60);
    assert_eq!(st.site, "yard");
    assert_eq!(st.battery_v, Some(12.6));
    assert_eq!(st.active_alarms, 1);
    assert!(router
        .event_log()
        .recent(1)[0]
        .message
        .contains("dev:a telemetry"));
}

#[test]
fn stale_telemetry_does_not_overwrite_newer() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    dev.deliver_json(
        Queue::Telemetry,
        &telemetry("dev:a", 2_000, vec![level(1, 40.0, LevelState::Normal)]),
    );
    dev.deliver_json(
        Queue::Telemetry,
        &telemetry("dev:a", 1_000, vec![level(1, 99.0, LevelState::Normal)]),
    );
    router.tick(&mut dev, &mut sink);

    let st = router.client_status(&id("dev:a")).unwrap();
    assert_eq!(st.last_seen, 2_000);
    assert_eq!(st.tanks[0].level_in, 40.0);
}

#[test]
fn duplicate_alarms_do_not_inflate_active_count() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    dev.deliver_json(
        Queue::Telemetry,
        &telemetry("dev:a", 100, vec![level(1, 50.0, LevelState::Normal)]),
    );
    let alarm = AlarmEvent {
        client: id("dev:a"),
        epoch: 200,
        tank: Some(1),
        kind: AlarmKind::TankHigh,
        value: Some(101.0),
        detail: "Diesel high at 101.0in".into(),
    };
    dev.deliver_json(Queue::Alarm, &alarm);
    dev.deliver_json(Queue::Alarm, &alarm);
    router.tick(&mut dev, &mut sink);

    let st = router.client_status(&id("dev:a")).unwrap();
    assert_eq!(st.active_alarms, 1);
    assert_eq!(st.tanks[0].state, LevelState::High);
    assert_eq!(st.last_seen, 200);
}

#[test]
fn malformed_client_record_is_dropped() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    dev.deliver(Queue::Daily, json!({"client": "dev:a"}));
    router.tick(&mut dev, &mut sink);

    assert!(router.client_status(&id("dev:a")).is_none());
    assert!(sink.any(|e| *e
        == AppEvent::NoteDropped {
            queue: Queue::Daily,
            reason: ProtocolError::Malformed,
        }));
}

#[test]
fn archive_capacity_bounds_event_log() {
    let mut dev = MockDevice::new("dev:srv");
    let mut cfg = DeviceConfig::default();
    cfg.server.archive_capacity = 3;
    dev.store_config(&cfg);
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    for epoch in 0..5 {
        dev.deliver_json(Queue::Telemetry, &telemetry("dev:a", epoch, Vec::new()));
    }
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.event_log().len(), 3);
}

// ── Summary publishing / viewer ───────────────────────────────

#[test]
fn summary_is_published_once_clients_are_known() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    router.tick(&mut dev, &mut sink);
    assert!(dev.sent_on(Queue::ViewerSummary).is_empty());

    dev.deliver_json(
        Queue::Telemetry,
        &telemetry("dev:a", EPOCH_BASE, vec![level(1, 10.0, LevelState::Low)]),
    );
    let interval = router.config().server.viewer_summary_interval_secs;
    dev.advance_secs(u64::from(interval));
    router.tick(&mut dev, &mut sink);

    let sent = dev.sent_on(Queue::ViewerSummary);
    assert_eq!(sent.len(), 1);
    let summary: FleetSummary = serde_json::from_value(sent[0].clone()).unwrap();
    assert_eq!(summary.server, id("dev:srv"));
    assert_eq!(summary.clients.len(), 1);
    assert_eq!(summary.clients[0].active_alarms, 1);
    assert!(sink.any(|e| *e == AppEvent::SummaryPublished { clients: 1 }));
}

#[test]
fn viewer_keeps_newest_summary_across_reboot() {
    let mut dev = MockDevice::new("dev:view");
    let (mut router, mut sink) = boot(Role::Viewer, &mut dev);

    let status = ClientStatus {
        client: id("dev:a"),
        site: "yard".into(),
        last_seen: 10,
        tanks: Vec::new(),
        battery_v: None,
        active_alarms: 0,
        config_version: Some(3),
    };
    let newer = FleetSummary {
        server: id("dev:srv"),
        epoch: 500,
        clients: vec![status.clone()],
    };
    let older = FleetSummary {
        server: id("dev:srv"),
        epoch: 400,
        clients: Vec::new(),
    };
    dev.deliver_json(Queue::ViewerSummary, &newer);
    dev.deliver_json(Queue::ViewerSummary, &older);
    router.tick(&mut dev, &mut sink);

    assert_eq!(router.fleet_summary(), Some(&newer));
    assert!(sink.any(|e| *e == AppEvent::SummaryReceived { clients: 1 }));
    assert!(dev.files.contains_key(SUMMARY_FILE));

    let rebooted = FleetRouter::new(Role::Viewer, id("dev:view"), &mut dev);
    assert_eq!(rebooted.fleet_summary(), Some(&newer));
}

// ── Relay forwarding ──────────────────────────────────────────

#[test]
fn forward_request_becomes_addressed_relay_command() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    let req = serde_json::to_value(forward_request("dev:a", "dev:pump", None)).unwrap();
    dev.deliver_from(Queue::RelayForward, req, Some(id("dev:a")));
    router.tick(&mut dev, &mut sink);

    let commands = dev.sent_on(Queue::Command);
    assert_eq!(commands.len(), 1);
    assert_eq!(
        commands[0],
        json!({"_target": "dev:pump", "_type": "relay", "relay": 2, "on": true, "_via": "dev:srv"})
    );
    let env = envelope::decode(&commands[0]).unwrap();
    assert_eq!(env.kind, CommandKind::Relay);
    assert!(sink.any(|e| *e
        == AppEvent::RelayForwarded {
            requester: id("dev:a"),
            target: id("dev:pump"),
        }));
}

#[test]
fn forward_loops_and_spoofs_are_refused() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    let spoofed = serde_json::to_value(forward_request("dev:a", "dev:pump", None)).unwrap();
    dev.deliver_from(Queue::RelayForward, spoofed, Some(id("dev:evil")));
    dev.deliver_json(
        Queue::RelayForward,
        &forward_request("dev:a", "dev:pump", Some("dev:other-srv")),
    );
    dev.deliver_json(Queue::RelayForward, &forward_request("dev:a", "dev:a", None));
    router.tick(&mut dev, &mut sink);

    assert!(dev.sent_on(Queue::Command).is_empty());
    assert_eq!(router.metrics().protocol_errors, 3);
    assert!(!sink.any(|e| matches!(e, AppEvent::RelayForwarded { .. })));
}

// ── Config dispatch ───────────────────────────────────────────

#[test]
fn pushed_config_stays_pending_until_acked() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    router
        .handle_command(
            AppCommand::PushConfig {
                target: id("dev:a"),
                config: pushed_config(4),
            },
            &mut dev,
        )
        .unwrap();

    let commands = dev.sent_on(Queue::Command);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["_target"], "dev:a");
    assert_eq!(commands[0]["_type"], "config");
    assert_eq!(commands[0]["origin"], "dev:srv");
    assert_eq!(router.dispatcher().unwrap().pending_version(&id("dev:a")), Some(4));

    dev.deliver_json(
        Queue::ConfigAck,
        &ConfigAck {
            target: id("dev:srv"),
            client: id("dev:a"),
            version: 4,
        },
    );
    router.tick(&mut dev, &mut sink);

    let dispatcher = router.dispatcher().unwrap();
    assert_eq!(dispatcher.pending_count(), 0);
    assert_eq!(dispatcher.acked_version(&id("dev:a")), Some(4));
    assert_eq!(
        router.client_status(&id("dev:a")).unwrap().config_version,
        Some(4)
    );
    assert!(sink.any(|e| *e
        == AppEvent::ConfigAcked {
            client: id("dev:a"),
            version: 4,
        }));
}

#[test]
fn ack_for_another_server_is_ignored() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    router
        .handle_command(
            AppCommand::PushConfig {
                target: id("dev:a"),
                config: pushed_config(2),
            },
            &mut dev,
        )
        .unwrap();
    dev.deliver_json(
        Queue::ConfigAck,
        &ConfigAck {
            target: id("dev:srv2"),
            client: id("dev:a"),
            version: 2,
        },
    );
    router.tick(&mut dev, &mut sink);
    assert_eq!(router.dispatcher().unwrap().pending_count(), 1);
}

#[test]
fn unsent_push_is_resent_and_survives_reboot() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    router.tick(&mut dev, &mut sink);

    dev.fail_sends = true;
    router
        .handle_command(
            AppCommand::PushConfig {
                target: id("dev:a"),
                config: pushed_config(1),
            },
            &mut dev,
        )
        .unwrap();
    assert!(dev.sent_on(Queue::Command).is_empty());

    // Pending set is durable: a fresh router sees it.
    let restored = FleetRouter::new(Role::Server, id("dev:srv"), &mut dev);
    assert_eq!(restored.dispatcher().unwrap().pending_count(), 1);

    dev.fail_sends = false;
    dev.advance_secs(60);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::Command).len(), 1);
}

#[test]
fn acked_push_is_not_resent() {
    let mut dev = MockDevice::new("dev:srv");
    let mut cfg = DeviceConfig::default();
    cfg.server.config_resend_secs = 120;
    dev.store_config(&cfg);
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    router.tick(&mut dev, &mut sink);
    router
        .handle_command(
            AppCommand::PushConfig {
                target: id("dev:a"),
                config: pushed_config(1),
            },
            &mut dev,
        )
        .unwrap();

    dev.advance_secs(180);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::Command).len(), 2);

    dev.deliver_json(
        Queue::ConfigAck,
        &ConfigAck {
            target: id("dev:srv"),
            client: id("dev:a"),
            version: 1,
        },
    );
    dev.advance_secs(300);
    router.tick(&mut dev, &mut sink);
    dev.advance_secs(300);
    router.tick(&mut dev, &mut sink);
    assert_eq!(dev.sent_on(Queue::Command).len(), 2);
}

#[test]
fn operator_relay_and_log_requests_go_out_as_envelopes() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, _) = boot(Role::Server, &mut dev);
    router
        .handle_command(
            AppCommand::SwitchRelay {
                target: id("dev:b"),
                action: RelayAction {
                    relay: 1,
                    on: true,
                    duration_secs: Some(60),
                    via: None,
                },
            },
            &mut dev,
        )
        .unwrap();
    router
        .handle_command(
            AppCommand::RequestSerialLog {
                target: id("dev:b"),
                count: None,
            },
            &mut dev,
        )
        .unwrap();

    let commands = dev.sent_on(Queue::Command);
    assert_eq!(
        commands[0],
        json!({"_target": "dev:b", "_type": "relay", "relay": 1, "on": true, "duration_secs": 60})
    );
    assert_eq!(
        commands[1],
        json!({"_target": "dev:b", "_type": "serial_request", "count": 20})
    );
}

#[test]
fn stale_push_below_acked_version_is_refused() {
    let mut dev = MockDevice::new("dev:srv");
    let (mut router, mut sink) = boot(Role::Server, &mut dev);
    dev.deliver_json(
        Queue::ConfigAck,
        &ConfigAck {
            target: id("dev:srv"),
            client: id("dev:a"),
            version: 6,
        },
    );
    router.tick(&mut dev, &mut sink);

    let err = router.handle_command(
        AppCommand::PushConfig {
            target: id("dev:a"),
            config: pushed_config(6),
        },
        &mut dev,
    );
    assert!(err.is_err());
    assert!(dev.sent_on(Queue::Command).is_empty());
}
