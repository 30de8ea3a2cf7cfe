//! TankFleet service: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  SpoolRelay     FsStorage     MonotonicClock   ThreadWatchdog│
//! │  (RelayPort)    (Storage)     (ClockPort)      (Watchdog)    │
//! │  SimHardware / ModbusRtu      LogEventSink                   │
//! │  (Sensor+Actuator+Register)   (EventSink)                    │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │          FleetRouter (client / server / viewer)        │  │
//! │  │  ConfigSync · Alarms · Power · Forwarder · Scheduler   │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Settings come from the environment:
//!
//! | Variable                  | Default     |
//! |---------------------------|-------------|
//! | `TANKFLEET_ROLE`          | `client`    |
//! | `TANKFLEET_DEVICE_UID`    | `dev:host`  |
//! | `TANKFLEET_DATA_DIR`      | `./data`    |
//! | `TANKFLEET_SPOOL_DIR`     | `./spool`   |
//! | `TANKFLEET_TICK_MS`       | `1000`      |
//! | `TANKFLEET_WATCHDOG_SECS` | `120`       |
//! | `TANKFLEET_MODBUS_DEV`    | (simulated) |
//! | `TANKFLEET_LOG`           | `info`      |

#![deny(unused_must_use)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use tankfleet::adapters::fs_storage::FsStorage;
use tankfleet::adapters::log_sink::LogEventSink;
use tankfleet::adapters::modbus_rtu;
use tankfleet::adapters::platform::HostPlatform;
use tankfleet::adapters::spool_relay::SpoolRelay;
use tankfleet::adapters::watchdog::{DEFAULT_WATCHDOG_SECS, ThreadWatchdog};
use tankfleet::app::commands::AppCommand;
use tankfleet::app::ports::WatchdogPort;
use tankfleet::app::router::{FleetRouter, Role};
use tankfleet::diagnostics;
use tankfleet::fleet::config_sync;

const LOG_ENV: &str = "TANKFLEET_LOG";
const OPERATOR_DIR: &str = "operator";
const SIM_INPUTS_FILE: &str = "sim_inputs.json";
const BOOT_RETRY_SECS: u64 = 15;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ── Operator drop-box ─────────────────────────────────────────
//
// Each `*.json` file under `<data>/operator/` is one AppCommand. The file
// is removed once handled, whatever the outcome.

fn drain_operator_commands(dir: &Path, router: &mut FleetRouter, io: &mut HostPlatform) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(|e| anyhow!(e))
            .and_then(|text| serde_json::from_str::<AppCommand>(&text).map_err(|e| anyhow!(e)));
        match parsed {
            Ok(cmd) => match router.handle_command(cmd, io) {
                Ok(()) => info!("Operator: {} handled", path.display()),
                Err(e) => warn!("Operator: {} failed: {}", path.display(), e),
            },
            Err(e) => warn!("Operator: {} unreadable: {}", path.display(), e),
        }
        if let Err(e) = fs::remove_file(&path) {
            warn!("Operator: could not remove {}: {}", path.display(), e);
        }
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. Logging + panic hook ───────────────────────────────
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_env(LOG_ENV)
        .try_init()
        .context("installing logger")?;
    diagnostics::install_panic_handler();

    info!("╔══════════════════════════════════════╗");
    info!("║  TankFleet v{}                    ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Settings ───────────────────────────────────────────
    let role_name = env_or("TANKFLEET_ROLE", "client");
    let role = Role::parse(&role_name).ok_or_else(|| anyhow!("unknown role '{role_name}'"))?;
    let data_dir = PathBuf::from(env_or("TANKFLEET_DATA_DIR", "./data"));
    let spool_dir = PathBuf::from(env_or("TANKFLEET_SPOOL_DIR", "./spool"));
    let uid = env_or("TANKFLEET_DEVICE_UID", "dev:host");
    let tick = Duration::from_millis(env_u64("TANKFLEET_TICK_MS", 1000).max(10));
    let watchdog_secs = env_u64("TANKFLEET_WATCHDOG_SECS", DEFAULT_WATCHDOG_SECS);

    // ── 3. Adapters ───────────────────────────────────────────
    let mut storage = FsStorage::open(&data_dir)
        .with_context(|| format!("opening data directory {}", data_dir.display()))?;
    // Line settings are read once; a pushed baud or timeout change takes
    // effect on the next start.
    let modbus_bus = match std::env::var("TANKFLEET_MODBUS_DEV") {
        Ok(dev) => {
            let solar = config_sync::load_or_default(&mut storage).solar;
            let bus = modbus_rtu::open_serial(&dev, &solar)
                .with_context(|| format!("opening Modbus device {dev}"))?;
            Some(bus)
        }
        Err(_) => None,
    };
    let relay = SpoolRelay::open(&spool_dir, uid)
        .with_context(|| format!("opening spool directory {}", spool_dir.display()))?;
    let watchdog = ThreadWatchdog::start(Duration::from_secs(watchdog_secs))
        .context("starting watchdog thread")?;
    let mut io = HostPlatform::new(relay, storage).with_watchdog(watchdog);

    if let Some(bus) = modbus_bus {
        io = io.with_bus(bus);
    }

    let sim_inputs = spool_dir.join(SIM_INPUTS_FILE);
    let operator_dir = data_dir.join(OPERATOR_DIR);
    let mut sink = LogEventSink::new();

    // ── 4. Boot (retried until the relay answers) ─────────────
    let mut router = loop {
        match FleetRouter::boot(role, &mut io, &mut sink) {
            Ok(r) => break r,
            Err(e) => {
                error!("Boot failed: {} (retrying in {}s)", e, BOOT_RETRY_SECS);
                io.feed();
                thread::sleep(Duration::from_secs(BOOT_RETRY_SECS));
            }
        }
    };

    info!("System ready. Entering main loop ({} ms tick).", tick.as_millis());

    // ── 5. Main loop ──────────────────────────────────────────
    loop {
        io.hw.refresh_from(&sim_inputs);
        router.tick(&mut io, &mut sink);
        drain_operator_commands(&operator_dir, &mut router, &mut io);
        thread::sleep(tick);
    }
}
