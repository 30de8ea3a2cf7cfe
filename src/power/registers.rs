//! Charge controller holding-register map and de-scaling.
//!
//! Addresses are 0-based PDU addresses for function 0x03. Reads are
//! grouped into contiguous blocks so one poll is five transactions.

use serde::{Deserialize, Serialize};

pub const REG_CHARGE_CURRENT: u16 = 0x0010;
pub const REG_LOAD_CURRENT: u16 = 0x0011;
pub const REG_BATTERY_VOLTAGE: u16 = 0x0012;
pub const REG_ARRAY_VOLTAGE: u16 = 0x0013;
pub const REG_HEATSINK_TEMP: u16 = 0x001B;
pub const REG_CHARGE_STATE: u16 = 0x002B;
pub const REG_FAULTS: u16 = 0x002C;
pub const REG_ALARMS: u16 = 0x002E;
pub const REG_AH_DAILY: u16 = 0x0034;
pub const REG_BATTERY_V_MIN_DAILY: u16 = 0x003D;
pub const REG_BATTERY_V_MAX_DAILY: u16 = 0x003E;

const SCALE_DIVISOR: f32 = 32768.0;
const AH_PER_COUNT: f32 = 0.1;

/// A contiguous run of registers fetched in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u16,
    pub count: u16,
}

/// Every register the monitor needs, in request order.
pub const POLL_BLOCKS: [Block; 5] = [
    // Icharge, Iload, Vbatt, Varray
    Block { start: REG_CHARGE_CURRENT, count: 4 },
    Block { start: REG_HEATSINK_TEMP, count: 1 },
    // state, faults, (load fault), alarms
    Block { start: REG_CHARGE_STATE, count: 4 },
    Block { start: REG_AH_DAILY, count: 1 },
    Block { start: REG_BATTERY_V_MIN_DAILY, count: 2 },
];

/// Largest block in [`POLL_BLOCKS`].
pub const MAX_BLOCK_LEN: usize = 4;

/// Raw register values from one complete poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawRegisters {
    pub charge_current: u16,
    pub load_current: u16,
    pub battery_voltage: u16,
    pub array_voltage: u16,
    pub heatsink_temp: u16,
    pub charge_state: u16,
    pub faults: u16,
    pub alarms: u16,
    pub ah_daily: u16,
    pub battery_v_min_daily: u16,
    pub battery_v_max_daily: u16,
}

impl RawRegisters {
    /// Store one register value by address; unmapped addresses are ignored.
    pub fn set(&mut self, addr: u16, value: u16) {
        let slot = match addr {
            REG_CHARGE_CURRENT => &mut self.charge_current,
            REG_LOAD_CURRENT => &mut self.load_current,
            REG_BATTERY_VOLTAGE => &mut self.battery_voltage,
            REG_ARRAY_VOLTAGE => &mut self.array_voltage,
            REG_HEATSINK_TEMP => &mut self.heatsink_temp,
            REG_CHARGE_STATE => &mut self.charge_state,
            REG_FAULTS => &mut self.faults,
            REG_ALARMS => &mut self.alarms,
            REG_AH_DAILY => &mut self.ah_daily,
            REG_BATTERY_V_MIN_DAILY => &mut self.battery_v_min_daily,
            REG_BATTERY_V_MAX_DAILY => &mut self.battery_v_max_daily,
            _ => return,
        };
        *slot = value;
    }
}

/// Nominal battery bank voltage; selects the scale factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SystemVoltage {
    #[default]
    #[serde(rename = "12v")]
    V12,
    #[serde(rename = "24v")]
    V24,
}

impl SystemVoltage {
    pub const fn voltage_scale(self) -> f32 {
        match self {
            Self::V12 => 100.0,
            Self::V24 => 200.0,
        }
    }

    pub const fn current_scale(self) -> f32 {
        79.16
    }

    pub fn volts(self, raw: u16) -> f32 {
        f32::from(raw) * self.voltage_scale() / SCALE_DIVISOR
    }

    pub fn amps(self, raw: u16) -> f32 {
        f32::from(raw) * self.current_scale() / SCALE_DIVISOR
    }
}

pub fn amp_hours(raw: u16) -> f32 {
    f32::from(raw) * AH_PER_COUNT
}

/// Heatsink register is a signed °C value.
pub fn celsius(raw: u16) -> i16 {
    raw as i16
}
