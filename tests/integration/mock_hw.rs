//! Mock device for integration tests.
//!
//! One struct implements every port so it satisfies `DeviceIo`. The
//! relay side records every sent note and serves inbound notes from
//! per-queue FIFOs; storage is an in-memory map with injectable faults.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;
use serde_json::Value;

use tankfleet::app::events::AppEvent;
use tankfleet::app::ports::{
    ActuatorError, ActuatorPort, ClockPort, EventSink, InboundNote, RegisterPort, RelayPort,
    SensorPort, StorageError, StoragePort, TankSample, WatchdogPort,
};
use tankfleet::config::{DeviceConfig, MAX_TANKS, TankConfig};
use tankfleet::error::{PeripheralError, TransportError};
use tankfleet::fleet::config_sync::CONFIG_FILE;
use tankfleet::fleet::identity::DeviceId;
use tankfleet::fleet::notefile::{Notefile, Queue};
use tankfleet::fleet::records::Location;
use tankfleet::store::AtomicStore;

pub const EPOCH_BASE: u64 = 1_700_000_000;

pub fn id(s: &str) -> DeviceId {
    DeviceId::new(s).unwrap()
}

// ── MockDevice ────────────────────────────────────────────────

pub struct MockDevice {
    pub uid: String,
    /// Every note accepted by `send`, in order.
    pub sent: Vec<(String, Value)>,
    pub inbox: HashMap<String, VecDeque<InboundNote>>,
    /// Network time at mono 0; `None` = modem not synced.
    pub epoch_base: Option<u64>,
    pub location: Option<Location>,
    pub fail_sends: bool,

    pub files: BTreeMap<String, Vec<u8>>,
    pub fail_writes: bool,
    pub fail_renames: bool,

    pub now_ms: u64,
    pub feeds: u32,

    pub levels: BTreeMap<u8, f32>,
    pub battery_v: Option<f32>,
    pub registers: BTreeMap<u16, u16>,
    pub controller_online: bool,
    pub relay_calls: Vec<(u8, bool)>,
}

impl MockDevice {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_owned(),
            sent: Vec::new(),
            inbox: HashMap::new(),
            epoch_base: Some(EPOCH_BASE),
            location: None,
            fail_sends: false,
            files: BTreeMap::new(),
            fail_writes: false,
            fail_renames: false,
            now_ms: 0,
            feeds: 0,
            levels: BTreeMap::new(),
            battery_v: None,
            registers: BTreeMap::new(),
            controller_online: true,
            relay_calls: Vec::new(),
        }
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.now_ms += secs * 1000;
    }

    /// Persist `cfg` as the device's stored configuration.
    pub fn store_config(&mut self, cfg: &DeviceConfig) {
        AtomicStore::new(self).write_json(CONFIG_FILE, cfg).unwrap();
    }

    pub fn deliver(&mut self, queue: Queue, body: Value) {
        self.deliver_from(queue, body, None);
    }

    pub fn deliver_from(&mut self, queue: Queue, body: Value, sender: Option<DeviceId>) {
        self.inbox
            .entry(queue.inbound().as_str().to_owned())
            .or_default()
            .push_back(InboundNote { body, sender });
    }

    pub fn deliver_json<T: Serialize>(&mut self, queue: Queue, body: &T) {
        self.deliver(queue, serde_json::to_value(body).unwrap());
    }

    /// Bodies sent on `queue`'s outbound notefile.
    pub fn sent_on(&self, queue: Queue) -> Vec<Value> {
        let name = queue.outbound();
        self.sent
            .iter()
            .filter(|(n, _)| n == name.as_str())
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Move everything sent on `from` into `to`'s inbound queue of `peer`,
    /// the way the relay routes `.qo` to `.qi`.
    pub fn route_to(&self, from: Queue, peer: &mut MockDevice, to: Queue, sender: &DeviceId) {
        for body in self.sent_on(from) {
            peer.deliver_from(to, body, Some(sender.clone()));
        }
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl RelayPort for MockDevice {
    fn device_uid(&mut self) -> Result<String, TransportError> {
        Ok(self.uid.clone())
    }

    fn send(&mut self, file: &Notefile, body: &Value) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Unreachable);
        }
        self.sent.push((file.as_str().to_owned(), body.clone()));
        Ok(())
    }

    fn receive(&mut self, file: &Notefile) -> Result<Option<InboundNote>, TransportError> {
        Ok(self.inbox.get_mut(file.as_str()).and_then(VecDeque::pop_front))
    }

    fn epoch_secs(&mut self) -> Result<Option<u64>, TransportError> {
        Ok(self.epoch_base.map(|b| b + self.now_ms / 1000))
    }

    fn location(&mut self) -> Result<Option<Location>, TransportError> {
        Ok(self.location)
    }
}

impl StoragePort for MockDevice {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.files.get(name).cloned().ok_or(StorageError::NotFound)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, StorageError> {
        if self.fail_writes {
            return Err(StorageError::Full);
        }
        self.files.insert(name.to_owned(), data.to_vec());
        Ok(data.len())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        if self.fail_renames {
            return Err(StorageError::IoError);
        }
        let data = self.files.remove(from).ok_or(StorageError::NotFound)?;
        self.files.insert(to.to_owned(), data);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.files.remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.files.keys().cloned().collect())
    }
}

impl ClockPort for MockDevice {
    fn monotonic_ms(&self) -> u64 {
        self.now_ms
    }
}

impl WatchdogPort for MockDevice {
    fn feed(&mut self) {
        self.feeds += 1;
    }
}

impl RegisterPort for MockDevice {
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
            *reg = self
                .registers
                .get(&(start + i as u16))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }
}

impl SensorPort for MockDevice {
    fn sample_tanks(&mut self, tanks: &[TankConfig]) -> heapless::Vec<TankSample, MAX_TANKS> {
        tanks
            .iter()
            .map(|t| match self.levels.get(&t.id) {
                Some(&level) => TankSample {
                    tank: t.id,
                    level_in: level,
                    valid: true,
                },
                None => TankSample {
                    tank: t.id,
                    level_in: 0.0,
                    valid: false,
                },
            })
            .collect()
    }

    fn battery_voltage(&mut self) -> Option<f32> {
        self.battery_v
    }
}

impl ActuatorPort for MockDevice {
    fn set_relay(&mut self, index: u8, on: bool) -> Result<(), ActuatorError> {
        if index == 0 || index > 4 {
            return Err(ActuatorError::NoSuchRelay(index));
        }
        self.relay_calls.push((index, on));
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn any(&self, pred: impl Fn(&AppEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
