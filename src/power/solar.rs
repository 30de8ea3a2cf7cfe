//! MPPT solar charge controller monitoring over Modbus.
//!
//! Each poll reads a fixed set of holding registers through a
//! [`RegisterPort`]. A poll is all-or-nothing: the previous snapshot is
//! replaced only when every block was read. Failed polls are counted and
//! the link is declared down after `comm_failure_threshold` of them in a
//! row; the next good poll restores it.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::alarm::AlertGate;
use crate::app::ports::RegisterPort;
use crate::config::SolarConfig;
use crate::error::PeripheralError;

use super::flags::{AlarmFlags, FaultFlags};
use super::registers::{self, MAX_BLOCK_LEN, POLL_BLOCKS, RawRegisters};

pub use super::registers::SystemVoltage;

// ───────────────────────────────────────────────────────────────
// Charge state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    Start,
    NightCheck,
    Disconnect,
    Night,
    Fault,
    Bulk,
    Absorption,
    Float,
    Equalize,
}

impl ChargeState {
    /// Decode the low byte of the charge-state register.
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw & 0xFF {
            0 => Self::Start,
            1 => Self::NightCheck,
            2 => Self::Disconnect,
            3 => Self::Night,
            4 => Self::Fault,
            5 => Self::Bulk,
            6 => Self::Absorption,
            7 => Self::Float,
            8 => Self::Equalize,
            _ => return None,
        })
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Start => "Starting",
            Self::NightCheck => "Night Check",
            Self::Disconnect => "Disconnected",
            Self::Night => "Night",
            Self::Fault => "FAULT",
            Self::Bulk => "Bulk",
            Self::Absorption => "Absorption",
            Self::Float => "Float",
            Self::Equalize => "Equalize",
        }
    }

    pub const fn is_charging(self) -> bool {
        matches!(self, Self::Bulk | Self::Absorption | Self::Equalize)
    }
}

// ───────────────────────────────────────────────────────────────
// Snapshot
// ───────────────────────────────────────────────────────────────

/// Decoded register snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarReading {
    pub battery_voltage: f32,
    pub array_voltage: f32,
    pub charge_current: f32,
    pub load_current: f32,
    pub heatsink_c: i16,
    /// `None` when the controller reported a code outside the known set.
    pub charge_state: Option<ChargeState>,
    pub faults: FaultFlags,
    pub alarms: AlarmFlags,
    pub ah_daily: f32,
    pub battery_v_min_daily: f32,
    pub battery_v_max_daily: f32,
    /// Monotonic seconds of the poll that produced this snapshot.
    pub read_at_secs: u64,
}

impl SolarReading {
    pub fn decode(raw: &RawRegisters, scale: SystemVoltage, read_at_secs: u64) -> Self {
        let charge_state = ChargeState::from_raw(raw.charge_state);
        if charge_state.is_none() {
            warn!("Solar: unknown charge state code {}", raw.charge_state);
        }
        Self {
            battery_voltage: scale.volts(raw.battery_voltage),
            array_voltage: scale.volts(raw.array_voltage),
            charge_current: scale.amps(raw.charge_current),
            load_current: scale.amps(raw.load_current),
            heatsink_c: registers::celsius(raw.heatsink_temp),
            charge_state,
            faults: FaultFlags::from_bits(raw.faults),
            alarms: AlarmFlags::from_bits(raw.alarms),
            ah_daily: registers::amp_hours(raw.ah_daily),
            battery_v_min_daily: scale.volts(raw.battery_v_min_daily),
            battery_v_max_daily: scale.volts(raw.battery_v_max_daily),
            read_at_secs,
        }
    }

    pub fn is_charging(&self) -> bool {
        self.charge_state.is_some_and(ChargeState::is_charging)
    }

    /// Float stage: the controller considers the battery full.
    pub fn is_fully_charged(&self) -> bool {
        self.charge_state == Some(ChargeState::Float)
    }

    pub fn has_fault(&self) -> bool {
        !self.faults.is_empty()
    }

    pub fn has_alarm(&self) -> bool {
        !self.alarms.is_empty()
    }

    /// Battery inside the configured low/high band with no controller fault.
    pub fn battery_healthy(&self, config: &SolarConfig) -> bool {
        (config.battery_low_voltage..=config.battery_high_voltage).contains(&self.battery_voltage)
            && !self.has_fault()
    }
}

/// Prioritised alert condition; at most one is reported per check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolarAlert {
    None,
    BatteryCritical,
    Fault,
    CommFailure,
    BatteryLow,
    BatteryHigh,
    HeatsinkTemp,
    Alarm,
}

/// Daily-report view of the charger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSummary {
    pub battery_voltage: f32,
    pub array_voltage: f32,
    pub charge_current: f32,
    pub charge_state: String,
    pub ah_daily: f32,
    pub battery_v_min_daily: f32,
    pub battery_v_max_daily: f32,
    pub faults: String,
    pub alarms: String,
    pub communication_ok: bool,
    pub is_charging: bool,
    pub is_fully_charged: bool,
    pub battery_healthy: bool,
    pub solar_healthy: bool,
}

// ───────────────────────────────────────────────────────────────
// Monitor
// ───────────────────────────────────────────────────────────────

pub struct SolarMonitor {
    config: SolarConfig,
    last_poll_secs: Option<u64>,
    reading: Option<SolarReading>,
    consecutive_errors: u32,
    communication_ok: bool,
    last_alert: SolarAlert,
    gate: AlertGate<SolarAlert>,
}

impl SolarMonitor {
    pub fn new(config: &SolarConfig, min_alert_interval_secs: u64) -> Self {
        Self {
            config: config.clone(),
            last_poll_secs: None,
            reading: None,
            consecutive_errors: 0,
            communication_ok: true,
            last_alert: SolarAlert::None,
            gate: AlertGate::new(min_alert_interval_secs),
        }
    }

    pub fn set_config(&mut self, config: &SolarConfig) {
        self.config = config.clone();
    }

    pub fn config(&self) -> &SolarConfig {
        &self.config
    }

    pub fn reading(&self) -> Option<&SolarReading> {
        self.reading.as_ref()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn communication_ok(&self) -> bool {
        self.communication_ok
    }

    /// See [`SolarReading::battery_healthy`]; `false` before the first poll.
    pub fn battery_healthy(&self) -> bool {
        self.reading
            .as_ref()
            .is_some_and(|r| r.battery_healthy(&self.config))
    }

    /// Healthy battery, live link, and no faults or alarms.
    pub fn solar_healthy(&self) -> bool {
        self.communication_ok
            && self
                .reading
                .as_ref()
                .is_some_and(|r| r.battery_healthy(&self.config) && !r.has_alarm())
    }

    /// Poll the controller if the interval has elapsed. Returns `true`
    /// only when a fresh snapshot was stored.
    pub fn poll(&mut self, now_secs: u64, port: &mut impl RegisterPort) -> bool {
        if !self.config.enabled {
            return false;
        }
        if let Some(last) = self.last_poll_secs {
            if now_secs.saturating_sub(last) < u64::from(self.config.poll_interval_secs) {
                return false;
            }
        }
        self.last_poll_secs = Some(now_secs);

        match self.read_all(port) {
            Ok(raw) => {
                let reading = SolarReading::decode(&raw, self.config.system_voltage, now_secs);
                debug!(
                    "Solar: {:.2}V batt, {:.2}V array, {:.2}A, {:?}",
                    reading.battery_voltage,
                    reading.array_voltage,
                    reading.charge_current,
                    reading.charge_state
                );
                self.reading = Some(reading);
                if !self.communication_ok {
                    info!("Solar: communication restored");
                }
                self.communication_ok = true;
                self.consecutive_errors = 0;
                true
            }
            Err(e) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                warn!(
                    "Solar: poll failed ({}), {} consecutive",
                    e, self.consecutive_errors
                );
                if self.communication_ok
                    && self.consecutive_errors >= u32::from(self.config.comm_failure_threshold)
                {
                    warn!("Solar: communication lost");
                    self.communication_ok = false;
                }
                false
            }
        }
    }

    fn read_all(&self, port: &mut impl RegisterPort) -> Result<RawRegisters, PeripheralError> {
        let mut raw = RawRegisters::default();
        let mut buf = [0u16; MAX_BLOCK_LEN];
        for block in POLL_BLOCKS {
            let out = &mut buf[..usize::from(block.count)];
            port.read_holding_registers(self.config.modbus_slave_id, block.start, out)?;
            for (addr, value) in (block.start..).zip(out.iter()) {
                raw.set(addr, *value);
            }
        }
        Ok(raw)
    }

    /// Highest-priority active condition.
    pub fn check_alerts(&self) -> SolarAlert {
        let c = &self.config;
        if !c.enabled {
            return SolarAlert::None;
        }
        let volts = self.reading.as_ref().map_or(0.0, |r| r.battery_voltage);
        let has_fault = self.reading.as_ref().is_some_and(SolarReading::has_fault);
        let has_alarm = self.reading.as_ref().is_some_and(SolarReading::has_alarm);
        let heatsink = self.reading.as_ref().map_or(0, |r| r.heatsink_c);

        if volts > 0.0 && volts < c.battery_critical_voltage {
            SolarAlert::BatteryCritical
        } else if has_fault && c.alert_on_fault {
            SolarAlert::Fault
        } else if !self.communication_ok && c.alert_on_comm_failure {
            SolarAlert::CommFailure
        } else if volts > 0.0 && volts < c.battery_low_voltage && c.alert_on_low_battery {
            SolarAlert::BatteryLow
        } else if volts > c.battery_high_voltage {
            SolarAlert::BatteryHigh
        } else if heatsink > c.heatsink_limit_c {
            SolarAlert::HeatsinkTemp
        } else if has_alarm && c.alert_on_fault {
            SolarAlert::Alarm
        } else {
            SolarAlert::None
        }
    }

    /// Edge-triggered variant of [`check_alerts`](Self::check_alerts):
    /// yields an alert only when the active condition changes, subject to
    /// the re-alert interval.
    pub fn take_alert(&mut self, now_secs: u64) -> Option<SolarAlert> {
        let alert = self.check_alerts();
        if alert == self.last_alert {
            return None;
        }
        self.last_alert = alert;
        if alert == SolarAlert::None {
            info!("Solar: alert condition cleared");
            return None;
        }
        self.gate.should_send(alert, now_secs).then_some(alert)
    }

    pub fn describe_alert(&self, alert: SolarAlert) -> String {
        match alert {
            SolarAlert::None => "OK".to_owned(),
            SolarAlert::BatteryCritical => "Battery voltage CRITICAL".to_owned(),
            SolarAlert::BatteryLow => "Battery voltage low".to_owned(),
            SolarAlert::BatteryHigh => "Battery overvoltage".to_owned(),
            SolarAlert::CommFailure => "Solar charger communication failure".to_owned(),
            SolarAlert::HeatsinkTemp => "Solar charger overheating".to_owned(),
            SolarAlert::Fault => self.fault_description(),
            SolarAlert::Alarm => self.alarm_description(),
        }
    }

    pub fn fault_description(&self) -> String {
        self.reading
            .as_ref()
            .map_or(FaultFlags::empty(), |r| r.faults)
            .describe("No faults")
    }

    pub fn alarm_description(&self) -> String {
        self.reading
            .as_ref()
            .map_or(AlarmFlags::empty(), |r| r.alarms)
            .describe("No alarms")
    }

    /// Restart the locally tracked daily figures (the controller keeps
    /// its own counters and resets them at its midnight).
    pub fn reset_daily_stats(&mut self) {
        if let Some(r) = self.reading.as_mut() {
            r.battery_v_min_daily = r.battery_voltage;
            r.battery_v_max_daily = r.battery_voltage;
            r.ah_daily = 0.0;
        }
    }

    pub fn summary(&self) -> Option<SolarSummary> {
        let r = self.reading.as_ref()?;
        Some(SolarSummary {
            battery_voltage: r.battery_voltage,
            array_voltage: r.array_voltage,
            charge_current: r.charge_current,
            charge_state: r
                .charge_state
                .map_or("Unknown", ChargeState::description)
                .to_owned(),
            ah_daily: r.ah_daily,
            battery_v_min_daily: r.battery_v_min_daily,
            battery_v_max_daily: r.battery_v_max_daily,
            faults: self.fault_description(),
            alarms: self.alarm_description(),
            communication_ok: self.communication_ok,
            is_charging: r.is_charging(),
            is_fully_charged: r.is_fully_charged(),
            battery_healthy: self.battery_healthy(),
            solar_healthy: self.solar_healthy(),
        })
    }
}
