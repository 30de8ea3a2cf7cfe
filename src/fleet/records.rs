//! Value objects exchanged between roles.
//!
//! Every record is stamped with the originating client and the epoch at
//! which it was produced (0 when the device had no time sync yet).

use serde::{Deserialize, Serialize};

use crate::alarm::LevelState;
use crate::diagnostics::LogEntry;
use crate::fleet::identity::DeviceId;
use crate::power::battery::{BatteryAlert, BatterySummary};
use crate::power::solar::{SolarAlert, SolarSummary};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Epoch of the fix, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankLevel {
    pub tank: u8,
    pub level_in: f32,
    pub valid: bool,
    pub state: LevelState,
}

// ───────────────────────────────────────────────────────────────
// Client → server
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub client: DeviceId,
    pub epoch: u64,
    #[serde(default)]
    pub site: String,
    pub tanks: Vec<TankLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    TankHigh,
    TankLow,
    TankClear,
    SensorFault,
    Battery(BatteryAlert),
    Solar(SolarAlert),
}

impl AlarmKind {
    /// Alarm kind for a tank level transition into `to`.
    pub fn for_level(to: LevelState) -> Self {
        match to {
            LevelState::High => Self::TankHigh,
            LevelState::Low => Self::TankLow,
            LevelState::Normal => Self::TankClear,
            LevelState::SensorFault => Self::SensorFault,
        }
    }

    /// Tank level state implied by a tank alarm; `None` for power alarms.
    pub fn level_state(self) -> Option<LevelState> {
        match self {
            Self::TankHigh => Some(LevelState::High),
            Self::TankLow => Some(LevelState::Low),
            Self::TankClear => Some(LevelState::Normal),
            Self::SensorFault => Some(LevelState::SensorFault),
            Self::Battery(_) | Self::Solar(_) => None,
        }
    }

    /// `true` for kinds that report a condition ending.
    pub fn is_clear(self) -> bool {
        matches!(self, Self::TankClear | Self::Battery(BatteryAlert::Recovered))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub client: DeviceId,
    pub epoch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tank: Option<u8>,
    pub kind: AlarmKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f32>,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub client: DeviceId,
    pub epoch: u64,
    #[serde(default)]
    pub site: String,
    pub tanks: Vec<TankLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatterySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solar: Option<SolarSummary>,
    /// Alarms raised since the previous report.
    #[serde(default)]
    pub alarm_count: u32,
    pub config_version: u32,
}

/// Acknowledges that `version` is durably applied on `client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigAck {
    /// Server that pushed the configuration.
    #[serde(rename = "_target")]
    pub target: DeviceId,
    pub client: DeviceId,
    pub version: u32,
}

/// Entries returned for a `serial_request` without an explicit count.
pub const DEFAULT_SERIAL_ENTRIES: u16 = 20;

/// Body of a `serial_request` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRequest {
    #[serde(default = "default_serial_entries")]
    pub count: u16,
}

fn default_serial_entries() -> u16 {
    DEFAULT_SERIAL_ENTRIES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialLogReply {
    pub client: DeviceId,
    pub epoch: u64,
    pub entries: Vec<LogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReply {
    pub client: DeviceId,
    pub epoch: u64,
    pub location: Option<Location>,
}

// ───────────────────────────────────────────────────────────────
// Server → viewers
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStatus {
    pub client: DeviceId,
    #[serde(default)]
    pub site: String,
    /// Epoch of the most recent record from this client.
    pub last_seen: u64,
    pub tanks: Vec<TankLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f32>,
    /// Alarms currently latched (raised and not yet cleared).
    #[serde(default)]
    pub active_alarms: u32,
    /// Last configuration version the client acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub server: DeviceId,
    pub epoch: u64,
    pub clients: Vec<ClientStatus>,
}
