//! Host platform: every port in one value.
//!
//! Bundles the host adapters so a single `&mut HostPlatform` satisfies
//! [`DeviceIo`](crate::app::ports::DeviceIo). Register reads go to the
//! serial Modbus bus when one is attached, otherwise to the simulated
//! charge controller.

use serde_json::Value;

use super::fs_storage::FsStorage;
use super::modbus_rtu::SerialBus;
use super::sim_hardware::SimHardware;
use super::spool_relay::SpoolRelay;
use super::time::MonotonicClock;
use super::watchdog::ThreadWatchdog;
use crate::app::ports::{
    ActuatorError, ActuatorPort, ClockPort, InboundNote, RegisterPort, RelayPort, SensorPort,
    StorageError, StoragePort, TankSample, WatchdogPort,
};
use crate::config::{MAX_TANKS, TankConfig};
use crate::error::{PeripheralError, TransportError};
use crate::fleet::notefile::Notefile;
use crate::fleet::records::Location;

pub struct HostPlatform {
    pub relay: SpoolRelay,
    pub storage: FsStorage,
    pub clock: MonotonicClock,
    pub watchdog: Option<ThreadWatchdog>,
    pub hw: SimHardware,
    pub bus: Option<SerialBus>,
}

impl HostPlatform {
    pub fn new(relay: SpoolRelay, storage: FsStorage) -> Self {
        Self {
            relay,
            storage,
            clock: MonotonicClock::new(),
            watchdog: None,
            hw: SimHardware::new(),
            bus: None,
        }
    }

    pub fn with_watchdog(mut self, watchdog: ThreadWatchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_bus(mut self, bus: SerialBus) -> Self {
        self.bus = Some(bus);
        self
    }
}

impl RelayPort for HostPlatform {
    fn device_uid(&mut self) -> Result<String, TransportError> {
        self.relay.device_uid()
    }

    fn send(&mut self, file: &Notefile, body: &Value) -> Result<(), TransportError> {
        self.relay.send(file, body)
    }

    fn receive(&mut self, file: &Notefile) -> Result<Option<InboundNote>, TransportError> {
        self.relay.receive(file)
    }

    fn epoch_secs(&mut self) -> Result<Option<u64>, TransportError> {
        self.relay.epoch_secs()
    }

    fn location(&mut self) -> Result<Option<Location>, TransportError> {
        self.relay.location()
    }
}

impl StoragePort for HostPlatform {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.storage.read(name)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, StorageError> {
        self.storage.write(name, data)
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        self.storage.rename(from, to)
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.storage.remove(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.storage.exists(name)
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        self.storage.list()
    }
}

impl ClockPort for HostPlatform {
    fn monotonic_ms(&self) -> u64 {
        self.clock.monotonic_ms()
    }
}

impl WatchdogPort for HostPlatform {
    fn feed(&mut self) {
        if let Some(wd) = self.watchdog.as_mut() {
            wd.feed();
        }
    }
}

impl RegisterPort for HostPlatform {
    fn read_holding_registers(
        &mut self,
        slave: u8,
        start: u16,
        out: &mut [u16],
    ) -> Result<(), PeripheralError> {
        match self.bus.as_mut() {
            Some(bus) => bus.read_holding_registers(slave, start, out),
            None => self.hw.read_holding_registers(slave, start, out),
        }
    }
}

impl SensorPort for HostPlatform {
    fn sample_tanks(&mut self, tanks: &[TankConfig]) -> heapless::Vec<TankSample, MAX_TANKS> {
        self.hw.sample_tanks(tanks)
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        self.hw.battery_voltage()
    }
}

impl ActuatorPort for HostPlatform {
    fn set_relay(&mut self, index: u8, on: bool) -> Result<(), ActuatorError> {
        self.hw.set_relay(index, on)
    }
}
