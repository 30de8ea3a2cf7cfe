//! Multi-device flows: client → server → client round trips through the
//! relay, plus power monitoring alarms raised by a client.

use tankfleet::alarm::LevelState;
use tankfleet::app::commands::AppCommand;
use tankfleet::app::events::AppEvent;
use tankfleet::app::router::{FleetRouter, Role};
use tankfleet::config::{BatteryConfig, DeviceConfig, SolarConfig, TankConfig};
use tankfleet::fleet::notefile::Queue;
use tankfleet::fleet::records::{AlarmEvent, AlarmKind};
use tankfleet::power::battery::BatteryAlert;
use tankfleet::power::solar::SolarAlert;

use crate::mock_hw::{MockDevice, RecordingSink, id};

fn boot(role: Role, dev: &mut MockDevice) -> (FleetRouter, RecordingSink) {
    let mut sink = RecordingSink::new();
    let router = FleetRouter::boot(role, dev, &mut sink).unwrap();
    (router, sink)
}

fn sensor_config() -> DeviceConfig {
    DeviceConfig {
        version: 1,
        site: "north yard".into(),
        tanks: vec![TankConfig {
            id: 1,
            label: "Water".into(),
            high_alarm_in: Some(100.0),
            low_alarm_in: None,
            hysteresis_in: 2.0,
            relay_target: Some(id("dev:pump")),
            relay_index: 2,
        }],
        ..DeviceConfig::default()
    }
}

fn alarms(dev: &MockDevice) -> Vec<AlarmEvent> {
    dev.sent_on(Queue::Alarm)
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect()
}

// ── Relay chain ───────────────────────────────────────────────

#[test]
fn high_level_switches_pump_through_server() {
    let mut sensor = MockDevice::new("dev:a");
    let mut server = MockDevice::new("dev:srv");
    let mut pump = MockDevice::new("dev:pump");
    sensor.store_config(&sensor_config());
    sensor.levels.insert(1, 120.0);

    let (mut sensor_router, mut sensor_sink) = boot(Role::Client, &mut sensor);
    let (mut server_router, mut server_sink) = boot(Role::Server, &mut server);
    let (mut pump_router, mut pump_sink) = boot(Role::Client, &mut pump);

    sensor_router.tick(&mut sensor, &mut sensor_sink);
    assert_eq!(sensor_router.tank_state(1), LevelState::High);

    let sensor_id = id("dev:a");
    sensor.route_to(Queue::Telemetry, &mut server, Queue::Telemetry, &sensor_id);
    sensor.route_to(Queue::Alarm, &mut server, Queue::Alarm, &sensor_id);
    sensor.route_to(Queue::RelayForward, &mut server, Queue::RelayForward, &sensor_id);
    server_router.tick(&mut server, &mut server_sink);

    let status = server_router.client_status(&sensor_id).unwrap();
    assert_eq!(status.active_alarms, 1);
    assert!(server_sink.any(|e| matches!(e, AppEvent::RelayForwarded { .. })));

    server.route_to(Queue::Command, &mut pump, Queue::Command, &id("dev:srv"));
    pump_router.tick(&mut pump, &mut pump_sink);

    assert_eq!(pump.relay_calls, vec![(2, true)]);
    assert!(pump_router.relays().is_on(2));
    assert!(pump_sink.any(|e| *e == AppEvent::RelayActuated { relay: 2, on: true }));
}

#[test]
fn relay_command_for_another_client_is_ignored() {
    let mut sensor = MockDevice::new("dev:a");
    let mut server = MockDevice::new("dev:srv");
    let mut bystander = MockDevice::new("dev:b");
    sensor.store_config(&sensor_config());
    sensor.levels.insert(1, 120.0);

    let (mut sensor_router, mut sensor_sink) = boot(Role::Client, &mut sensor);
    let (mut server_router, mut server_sink) = boot(Role::Server, &mut server);
    let (mut other_router, mut other_sink) = boot(Role::Client, &mut bystander);

    sensor_router.tick(&mut sensor, &mut sensor_sink);
    sensor.route_to(Queue::RelayForward, &mut server, Queue::RelayForward, &id("dev:a"));
    server_router.tick(&mut server, &mut server_sink);
    server.route_to(Queue::Command, &mut bystander, Queue::Command, &id("dev:srv"));
    other_router.tick(&mut bystander, &mut other_sink);

    assert!(bystander.relay_calls.is_empty());
    assert!(!other_router.relays().is_on(2));
}

// ── Config round trip ─────────────────────────────────────────

#[test]
fn pushed_config_is_applied_and_acknowledged() {
    let mut server = MockDevice::new("dev:srv");
    let mut client = MockDevice::new("dev:a");
    let (mut server_router, mut server_sink) = boot(Role::Server, &mut server);
    let (mut client_router, mut client_sink) = boot(Role::Client, &mut client);

    let mut cfg = sensor_config();
    cfg.version = 3;
    server_router
        .handle_command(
            AppCommand::PushConfig {
                target: id("dev:a"),
                config: cfg,
            },
            &mut server,
        )
        .unwrap();

    server.route_to(Queue::Command, &mut client, Queue::Command, &id("dev:srv"));
    client_router.tick(&mut client, &mut client_sink);
    assert_eq!(client_router.config().version, 3);
    assert!(client_sink.any(|e| *e == AppEvent::ConfigApplied(3)));

    client.route_to(Queue::ConfigAck, &mut server, Queue::ConfigAck, &id("dev:a"));
    server_router.tick(&mut server, &mut server_sink);

    let dispatcher = server_router.dispatcher().unwrap();
    assert_eq!(dispatcher.pending_count(), 0);
    assert_eq!(dispatcher.acked_version(&id("dev:a")), Some(3));
    assert!(server_sink.any(|e| *e
        == AppEvent::ConfigAcked {
            client: id("dev:a"),
            version: 3,
        }));
}

// ── Power monitoring ──────────────────────────────────────────

#[test]
fn critical_supply_voltage_raises_battery_alarm_once() {
    let mut dev = MockDevice::new("dev:a");
    let cfg = DeviceConfig {
        battery: BatteryConfig {
            enabled: true,
            ..BatteryConfig::default()
        },
        ..DeviceConfig::default()
    };
    dev.store_config(&cfg);
    // 11.55V once the calibration offset is added: critical, not yet dead.
    dev.battery_v = Some(11.2);
    let (mut router, mut sink) = boot(Role::Client, &mut dev);

    router.tick(&mut dev, &mut sink);
    let raised = alarms(&dev);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlarmKind::Battery(BatteryAlert::Critical));
    assert!(raised[0].tank.is_none());

    dev.advance_secs(u64::from(cfg.battery.poll_interval_secs));
    router.tick(&mut dev, &mut sink);
    assert_eq!(alarms(&dev).len(), 1);
}

#[test]
fn lost_charge_controller_raises_comm_failure() {
    let mut dev = MockDevice::new("dev:a");
    let cfg = DeviceConfig {
        solar: SolarConfig {
            enabled: true,
            alert_on_comm_failure: true,
            comm_failure_threshold: 3,
            ..SolarConfig::default()
        },
        ..DeviceConfig::default()
    };
    dev.store_config(&cfg);
    dev.controller_online = false;
    let (mut router, mut sink) = boot(Role::Client, &mut dev);

    for _ in 0..3 {
        router.tick(&mut dev, &mut sink);
        dev.advance_secs(u64::from(cfg.solar.poll_interval_secs));
    }

    let raised = alarms(&dev);
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].kind, AlarmKind::Solar(SolarAlert::CommFailure));
    assert!(!router.solar().communication_ok());
}
