//! Device configuration document.
//!
//! One versioned document per device, pushed by the server inside a
//! `config` command envelope and persisted through the atomic store.
//! Unknown keys are ignored and missing keys fall back to the compiled
//! defaults below, so older and newer firmware can exchange documents.

use serde::{Deserialize, Serialize};

use crate::fleet::identity::DeviceId;
use crate::power::battery::{BatteryThresholds, BatteryType};
use crate::power::solar::SystemVoltage;

/// Maximum number of tanks a single client monitors.
pub const MAX_TANKS: usize = 8;

/// Inbound polling floor for devices without mains power (seconds).
pub const LOW_POWER_INBOUND_SECS: u32 = 60 * 60;

/// Top-level device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Monotonic document version; only newer versions are applied.
    pub version: u32,
    /// Free-text site label shown on dashboards.
    pub site: String,

    // --- Sampling ---
    /// Tank sample / telemetry interval (seconds).
    pub sample_interval_secs: u32,
    /// Minimum level change (inches) before telemetry is sent; 0 = always.
    pub level_change_threshold_in: f32,

    // --- Daily report ---
    pub report_hour: u8,
    pub report_minute: u8,

    // --- Power / cadence ---
    pub power_profile: PowerProfile,
    /// Inbound queue poll interval on mains power (seconds).
    pub inbound_poll_secs: u32,
    /// Maximum notes drained from one queue per loop iteration.
    pub inbound_batch: u8,

    pub tanks: Vec<TankConfig>,
    pub battery: BatteryConfig,
    pub solar: SolarConfig,
    pub server: ServerSettings,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: 0,
            site: String::new(),

            sample_interval_secs: 1800, // 30 min
            level_change_threshold_in: 0.0,

            report_hour: 5,
            report_minute: 0,

            power_profile: PowerProfile::Grid,
            inbound_poll_secs: 300,
            inbound_batch: 8,

            tanks: Vec::new(),
            battery: BatteryConfig::default(),
            solar: SolarConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl DeviceConfig {
    /// Inbound poll cadence after applying the power profile.
    pub fn effective_inbound_secs(&self) -> u32 {
        match self.power_profile {
            PowerProfile::Grid => self.inbound_poll_secs,
            PowerProfile::Solar | PowerProfile::Battery => {
                self.inbound_poll_secs.max(LOW_POWER_INBOUND_SECS)
            }
        }
    }

    pub fn tank(&self, id: u8) -> Option<&TankConfig> {
        self.tanks.iter().find(|t| t.id == id)
    }
}

/// How the station is powered; drives inbound polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerProfile {
    #[default]
    Grid,
    Solar,
    Battery,
}

/// Per-tank alarm configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    pub id: u8,
    pub label: String,
    /// Alarm when the level rises to or above this (inches).
    pub high_alarm_in: Option<f32>,
    /// Alarm when the level falls to or below this (inches).
    pub low_alarm_in: Option<f32>,
    /// Band the level must move back through before an alarm clears.
    pub hysteresis_in: f32,
    /// Client whose relay is switched on while this tank is in alarm.
    pub relay_target: Option<DeviceId>,
    pub relay_index: u8,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            id: 1,
            label: String::new(),
            high_alarm_in: None,
            low_alarm_in: None,
            hysteresis_in: 0.5,
            relay_target: None,
            relay_index: 1,
        }
    }
}

/// Battery monitoring configuration. Threshold fields left `None` take
/// the chemistry defaults of `battery_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub enabled: bool,
    pub battery_type: BatteryType,

    pub high_voltage: Option<f32>,
    pub normal_voltage: Option<f32>,
    pub low_voltage: Option<f32>,
    pub critical_voltage: Option<f32>,
    pub dead_voltage: Option<f32>,

    /// Added to raw readings to compensate the protection-diode drop.
    pub calibration_offset: f32,
    pub poll_interval_secs: u32,
    /// Age limit of the reading window backing trend analysis.
    pub trend_analysis_hours: u16,

    pub alert_on_low: bool,
    pub alert_on_critical: bool,
    pub alert_on_high: bool,
    pub alert_on_declining: bool,
    pub alert_on_recovery: bool,
    /// Weekly decline (volts, positive) that raises a declining alert.
    pub decline_alert_threshold: f32,
    /// Identical alerts are suppressed for this long (seconds).
    pub min_alert_interval_secs: u32,
    pub include_in_daily_report: bool,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            battery_type: BatteryType::LeadAcid12V,
            high_voltage: None,
            normal_voltage: None,
            low_voltage: None,
            critical_voltage: None,
            dead_voltage: None,
            calibration_offset: 0.35,
            poll_interval_secs: 300,
            trend_analysis_hours: 168,
            alert_on_low: true,
            alert_on_critical: true,
            alert_on_high: true,
            alert_on_declining: true,
            alert_on_recovery: false,
            decline_alert_threshold: 0.5,
            min_alert_interval_secs: 3600,
            include_in_daily_report: true,
        }
    }
}

impl BatteryConfig {
    /// Chemistry defaults with any explicit overrides applied.
    pub fn thresholds(&self) -> BatteryThresholds {
        let base = self.battery_type.thresholds();
        BatteryThresholds {
            high: self.high_voltage.unwrap_or(base.high),
            normal: self.normal_voltage.unwrap_or(base.normal),
            low: self.low_voltage.unwrap_or(base.low),
            critical: self.critical_voltage.unwrap_or(base.critical),
            dead: self.dead_voltage.or(base.dead),
        }
    }
}

/// Solar charge controller (MPPT) monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarConfig {
    pub enabled: bool,
    pub modbus_slave_id: u8,
    pub modbus_baud_rate: u32,
    pub modbus_timeout_ms: u16,
    pub poll_interval_secs: u32,
    pub system_voltage: SystemVoltage,

    pub battery_low_voltage: f32,
    pub battery_critical_voltage: f32,
    pub battery_high_voltage: f32,
    pub heatsink_limit_c: i16,
    /// Consecutive failed polls before communication is declared lost.
    pub comm_failure_threshold: u8,

    pub alert_on_low_battery: bool,
    pub alert_on_fault: bool,
    pub alert_on_comm_failure: bool,
    pub include_in_daily_report: bool,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            modbus_slave_id: 1,
            modbus_baud_rate: 9600,
            modbus_timeout_ms: 200,
            poll_interval_secs: 60,
            system_voltage: SystemVoltage::V12,

            battery_low_voltage: 11.8,
            battery_critical_voltage: 11.5,
            battery_high_voltage: 14.8,
            heatsink_limit_c: 60,
            comm_failure_threshold: 5,

            alert_on_low_battery: true,
            alert_on_fault: true,
            alert_on_comm_failure: false,
            include_in_daily_report: true,
        }
    }
}

/// Settings only the server role reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Unacknowledged config pushes are re-sent after this long.
    pub config_resend_secs: u32,
    /// Fleet summary publish interval for viewers.
    pub viewer_summary_interval_secs: u32,
    /// Records kept in the persistent archive ring.
    pub archive_capacity: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            config_resend_secs: 6 * 60 * 60,
            viewer_summary_interval_secs: 6 * 60 * 60,
            archive_capacity: 64,
        }
    }
}

/// Range-check a document before it is persisted. Bad values are
/// rejected, never clamped.
pub fn validate_config(cfg: &DeviceConfig) -> Result<(), &'static str> {
    if !(60..=86_400).contains(&cfg.sample_interval_secs) {
        return Err("sample_interval_secs must be 60–86400");
    }
    if !(cfg.level_change_threshold_in >= 0.0) {
        return Err("level_change_threshold_in must be >= 0");
    }
    if cfg.report_hour > 23 || cfg.report_minute > 59 {
        return Err("report time must be a valid hour:minute");
    }
    if !(30..=86_400).contains(&cfg.inbound_poll_secs) {
        return Err("inbound_poll_secs must be 30–86400");
    }
    if cfg.inbound_batch == 0 {
        return Err("inbound_batch must be >= 1");
    }

    if cfg.tanks.len() > MAX_TANKS {
        return Err("too many tanks");
    }
    for (i, t) in cfg.tanks.iter().enumerate() {
        if cfg.tanks[..i].iter().any(|o| o.id == t.id) {
            return Err("tank ids must be unique");
        }
        if let (Some(hi), Some(lo)) = (t.high_alarm_in, t.low_alarm_in) {
            if hi <= lo {
                return Err("tank high_alarm_in must be above low_alarm_in");
            }
        }
        if !(t.hysteresis_in >= 0.0) {
            return Err("tank hysteresis_in must be >= 0");
        }
        if t.relay_index == 0 {
            return Err("tank relay_index is 1-based");
        }
    }

    let b = cfg.battery.thresholds();
    if !(b.high > b.low && b.low > b.critical) {
        return Err("battery thresholds must be ordered high > low > critical");
    }
    if let Some(dead) = b.dead {
        if dead >= b.critical {
            return Err("battery dead_voltage must be below critical");
        }
    }
    if !(24..=720).contains(&cfg.battery.trend_analysis_hours) {
        return Err("battery trend_analysis_hours must be 24–720");
    }
    if cfg.battery.poll_interval_secs == 0 {
        return Err("battery poll_interval_secs must be > 0");
    }
    if !(cfg.battery.decline_alert_threshold > 0.0) {
        return Err("battery decline_alert_threshold must be > 0");
    }

    let s = &cfg.solar;
    if !(s.battery_critical_voltage < s.battery_low_voltage
        && s.battery_low_voltage < s.battery_high_voltage)
    {
        return Err("solar thresholds must be ordered critical < low < high");
    }
    if s.comm_failure_threshold == 0 {
        return Err("solar comm_failure_threshold must be >= 1");
    }
    if s.poll_interval_secs == 0 {
        return Err("solar poll_interval_secs must be > 0");
    }
    if !(50..=5000).contains(&s.modbus_timeout_ms) {
        return Err("solar modbus_timeout_ms must be 50–5000");
    }

    if cfg.server.config_resend_secs < 60 {
        return Err("server config_resend_secs must be >= 60");
    }
    if cfg.server.viewer_summary_interval_secs < 60 {
        return Err("server viewer_summary_interval_secs must be >= 60");
    }
    if cfg.server.archive_capacity == 0 {
        return Err("server archive_capacity must be >= 1");
    }
    Ok(())
}
