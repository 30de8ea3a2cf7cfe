//! Modbus RTU master over a byte link.
//!
//! Implements [`RegisterPort`] (function 0x03, read holding registers) on
//! any [`RtuLink`]. Frames are `slave | function | data | crc16-le`; an
//! exception reply sets the high bit of the function code and carries a
//! one-byte exception code.
//!
//! The inter-frame silence (3.5 character times) is enforced with an
//! `embedded_hal` [`DelayNs`] before each request, so the same driver runs
//! on an MCU UART or on a host serial port. On the host the port is opened
//! through `serialport` with the configured baud rate and read timeout, so
//! a silent controller surfaces as [`PeripheralError::Timeout`].

use std::io::{self, Read, Write};
use std::time::Duration;

use crc::{CRC_16_MODBUS, Crc};
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};

use crate::app::ports::RegisterPort;
use crate::config::SolarConfig;
use crate::error::PeripheralError;

pub const FN_READ_HOLDING: u8 = 0x03;
const EXCEPTION_BIT: u8 = 0x80;
/// Protocol limit for one 0x03 request.
pub const MAX_READ_REGISTERS: usize = 125;
/// 3.5 characters at 9600 8N1 is about 4 ms.
pub const DEFAULT_FRAME_GAP_US: u32 = 4_000;
/// Fixed gap the protocol prescribes above 19200 baud.
const FAST_FRAME_GAP_US: u32 = 1_750;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Half-duplex byte link to the RS-485 transceiver.
pub trait RtuLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PeripheralError>;

    /// Read up to `buf.len()` bytes. `Ok(0)` means the read timed out.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError>;

    /// Drop any stale bytes left over from a previous exchange.
    fn discard_input(&mut self) {}
}

/// CRC-16/MODBUS, sent low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Inter-frame gap for `baud`: 3.5 characters of 10 bits, or the fixed
/// 1.75 ms above 19200 baud.
pub fn frame_gap_us(baud: u32) -> u32 {
    if baud == 0 {
        DEFAULT_FRAME_GAP_US
    } else if baud > 19_200 {
        FAST_FRAME_GAP_US
    } else {
        35_000_000_u32.div_ceil(baud)
    }
}

/// Build a 0x03 request frame.
pub fn read_request(slave: u8, start: u16, count: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = slave;
    frame[1] = FN_READ_HOLDING;
    frame[2..4].copy_from_slice(&start.to_be_bytes());
    frame[4..6].copy_from_slice(&count.to_be_bytes());
    let crc = crc16(&frame[..6]);
    frame[6..8].copy_from_slice(&crc.to_le_bytes());
    frame
}

fn check_crc(frame: &[u8]) -> Result<(), PeripheralError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    if crc16(body) == received {
        Ok(())
    } else {
        Err(PeripheralError::Crc)
    }
}

pub struct ModbusRtu<L, D> {
    link: L,
    delay: D,
    frame_gap_us: u32,
}

impl<L: RtuLink, D: DelayNs> ModbusRtu<L, D> {
    pub fn new(link: L, delay: D) -> Self {
        Self {
            link,
            delay,
            frame_gap_us: DEFAULT_FRAME_GAP_US,
        }
    }

    pub fn with_frame_gap_us(mut self, us: u32) -> Self {
        self.frame_gap_us = us;
        self
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), PeripheralError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.link.read(&mut buf[filled..])? {
                0 => return Err(PeripheralError::Timeout),
                n => filled += n,
            }
        }
        Ok(())
    }
}

impl<L: RtuLink, D: DelayNs> RegisterPort for ModbusRtu<L, D> {
    fn read_holding_registers(
        &mut self,
        slave: u8,
        start: u16,
        out: &mut [u16],
    ) -> Result<(), PeripheralError> {
        if out.is_empty() || out.len() > MAX_READ_REGISTERS {
            return Err(PeripheralError::BadResponse);
        }

        self.link.discard_input();
        self.delay.delay_us(self.frame_gap_us);
        let request = read_request(slave, start, out.len() as u16);
        self.link.write_all(&request)?;

        let mut frame = [0u8; 3 + 2 * MAX_READ_REGISTERS + 2];
        self.read_exact(&mut frame[..3])?;
        if frame[0] != slave {
            warn!("Modbus: reply from slave {} (expected {})", frame[0], slave);
            return Err(PeripheralError::BadResponse);
        }

        if frame[1] == FN_READ_HOLDING | EXCEPTION_BIT {
            self.read_exact(&mut frame[3..5])?;
            check_crc(&frame[..5])?;
            debug!("Modbus: slave {} exception 0x{:02X}", slave, frame[2]);
            return Err(PeripheralError::Exception(frame[2]));
        }
        if frame[1] != FN_READ_HOLDING {
            return Err(PeripheralError::BadResponse);
        }

        let byte_count = frame[2] as usize;
        if byte_count != out.len() * 2 {
            return Err(PeripheralError::BadResponse);
        }
        let total = 3 + byte_count + 2;
        self.read_exact(&mut frame[3..total])?;
        check_crc(&frame[..total])?;

        for (i, reg) in out.iter_mut().enumerate() {
            *reg = u16::from_be_bytes([frame[3 + 2 * i], frame[4 + 2 * i]]);
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Host glue
// ───────────────────────────────────────────────────────────────

/// [`RtuLink`] over a blocking `Read + Write` handle whose reads give up
/// with `TimedOut` (or `WouldBlock`) after the line timeout.
pub struct IoLink<T> {
    inner: T,
}

impl<T: Read + Write> IoLink<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Read + Write> RtuLink for IoLink<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PeripheralError> {
        self.inner
            .write_all(bytes)
            .and_then(|()| self.inner.flush())
            .map_err(|_| PeripheralError::Link)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(0),
            Err(_) => Err(PeripheralError::Link),
        }
    }
}

/// Host serial port as an RTU link. Stale input is flushed before each
/// request.
pub struct SerialLink {
    port: IoLink<Box<dyn SerialPort>>,
}

impl RtuLink for SerialLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), PeripheralError> {
        self.port.write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralError> {
        self.port.read(buf)
    }

    fn discard_input(&mut self) {
        if let Err(e) = self.port.inner.clear(ClearBuffer::Input) {
            debug!("Modbus: input flush failed: {}", e);
        }
    }
}

pub type SerialBus = ModbusRtu<SerialLink, StdDelay>;

/// Open `path` as an 8N1 Modbus line using the baud rate and per-read
/// timeout from `cfg`.
pub fn open_serial(path: &str, cfg: &SolarConfig) -> Result<SerialBus, serialport::Error> {
    let port = serialport::new(path, cfg.modbus_baud_rate)
        .timeout(Duration::from_millis(u64::from(cfg.modbus_timeout_ms)))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .open()?;
    info!(
        "Modbus: {} at {} baud, {} ms timeout",
        path, cfg.modbus_baud_rate, cfg.modbus_timeout_ms
    );
    let link = SerialLink {
        port: IoLink::new(port),
    };
    Ok(ModbusRtu::new(link, StdDelay).with_frame_gap_us(frame_gap_us(cfg.modbus_baud_rate)))
}

/// [`DelayNs`] backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}
