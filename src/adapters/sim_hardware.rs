//! Simulated tank sensors, relays and charge controller.
//!
//! Stands in for the level senders, relay board and Modbus charge
//! controller on a host build. Values are set programmatically or from a
//! small JSON override file that an operator can edit while the service
//! runs:
//!
//! ```json
//! { "levels": { "1": 42.5 }, "battery_v": 12.6, "registers": { "18": 20000 } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;

use crate::app::ports::{ActuatorError, ActuatorPort, RegisterPort, SensorPort, TankSample};
use crate::config::{MAX_TANKS, TankConfig};
use crate::error::PeripheralError;
use crate::fleet::forward::MAX_RELAYS;

#[derive(Debug, Default, Deserialize)]
struct Overrides {
    #[serde(default)]
    levels: BTreeMap<u8, f32>,
    #[serde(default)]
    battery_v: Option<f32>,
    #[serde(default)]
    registers: BTreeMap<u16, u16>,
    #[serde(default)]
    controller_online: Option<bool>,
}

pub struct SimHardware {
    levels: BTreeMap<u8, f32>,
    battery_v: Option<f32>,
    relays: [bool; MAX_RELAYS],
    registers: BTreeMap<u16, u16>,
    controller_online: bool,
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
            battery_v: Some(12.8),
            relays: [false; MAX_RELAYS],
            registers: BTreeMap::new(),
            controller_online: true,
        }
    }

    pub fn set_level(&mut self, tank: u8, level_in: f32) {
        self.levels.insert(tank, level_in);
    }

    pub fn clear_level(&mut self, tank: u8) {
        self.levels.remove(&tank);
    }

    pub fn set_battery_voltage(&mut self, volts: Option<f32>) {
        self.battery_v = volts;
    }

    pub fn set_register(&mut self, addr: u16, value: u16) {
        self.registers.insert(addr, value);
    }

    pub fn set_controller_online(&mut self, online: bool) {
        self.controller_online = online;
    }

    /// Relay state, 1-based like [`ActuatorPort::set_relay`].
    pub fn relay(&self, index: u8) -> Option<bool> {
        let slot = usize::from(index).checked_sub(1)?;
        self.relays.get(slot).copied()
    }

    /// Merge values from an override file. A missing file is not an error.
    pub fn refresh_from(&mut self, path: &Path) {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return,
        };
        match serde_json::from_str::<Overrides>(&text) {
            Ok(o) => {
                self.levels.extend(o.levels);
                self.registers.extend(o.registers);
                if o.battery_v.is_some() {
                    self.battery_v = o.battery_v;
                }
                if let Some(online) = o.controller_online {
                    self.controller_online = online;
                }
            }
            Err(e) => warn!("SimHardware: bad override file {}: {}", path.display(), e),
        }
    }
}

impl SensorPort for SimHardware {
    fn sample_tanks(&mut self, tanks: &[TankConfig]) -> heapless::Vec<TankSample, MAX_TANKS> {
        let mut out = heapless::Vec::new();
        for tank in tanks.iter().take(MAX_TANKS) {
            let sample = match self.levels.get(&tank.id) {
                Some(&level) if level.is_finite() && level >= 0.0 => TankSample {
                    tank: tank.id,
                    level_in: level,
                    valid: true,
                },
                _ => TankSample {
                    tank: tank.id,
                    level_in: 0.0,
                    valid: false,
                },
            };
            let _ = out.push(sample);
        }
        out
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        self.battery_v
    }
}

impl ActuatorPort for SimHardware {
    fn set_relay(&mut self, index: u8, on: bool) -> Result<(), ActuatorError> {
        let slot = usize::from(index)
            .checked_sub(1)
            .filter(|&s| s < MAX_RELAYS)
            .ok_or(ActuatorError::NoSuchRelay(index))?;
        self.relays[slot] = on;
        info!("Relay {}: {}", index, if on { "ON" } else { "OFF" });
        Ok(())
    }
}

impl RegisterPort for SimHardware {
    fn read_holding_registers(
        &mut self,
        _slave: u8,
        start: u16,
        out: &mut [u16],
    ) -> Result<(), PeripheralError> {
        if !self.controller_online {
            return Err(PeripheralError::Timeout);
        }
        for (i, reg) in out.iter_mut().enumerate() {
            let addr = start.wrapping_add(i as u16);
            *reg = self.registers.get(&addr).copied().unwrap_or(0);
        }
        Ok(())
    }
}
