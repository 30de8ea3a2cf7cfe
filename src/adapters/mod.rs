//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                  |
//! |----------------|--------------------|------------------------------|
//! | `fs_storage`   | StoragePort        | data directory (sync'd)      |
//! | `log_sink`     | EventSink          | console log output           |
//! | `modbus_rtu`   | RegisterPort       | RS-485 charge controller     |
//! | `platform`     | all device ports   | bundles the adapters below   |
//! | `sim_hardware` | SensorPort         | simulated level senders      |
//! |                | ActuatorPort       | simulated relay board        |
//! |                | RegisterPort       | simulated charge controller  |
//! | `spool_relay`  | RelayPort          | outbox/inbox JSONL spools    |
//! | `time`         | ClockPort          | host monotonic clock         |
//! | `watchdog`     | WatchdogPort       | monitor thread (abort)       |

pub mod fs_storage;
pub mod log_sink;
pub mod modbus_rtu;
pub mod platform;
pub mod sim_hardware;
pub mod spool_relay;
pub mod time;
pub mod watchdog;
