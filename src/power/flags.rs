//! Typed bitfield sets for the charge controller's fault and alarm
//! registers.
//!
//! Iteration follows bit order (LSB first), so descriptions are stable.
//! Bits with no named flag are kept in `bits()` but never yielded; text
//! descriptions report them as a raw mask.

use core::fmt;
use core::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A single named bit in a register.
pub trait Flag: Copy + fmt::Debug + 'static {
    /// Every flag, in bit order.
    const ALL: &'static [Self];

    fn bit(self) -> u8;

    /// Short label used in alert text.
    fn label(self) -> &'static str;

    fn mask(self) -> u16 {
        1 << self.bit()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet<F: Flag> {
    bits: u16,
    #[serde(skip)]
    _flag: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    pub const fn empty() -> Self {
        Self::from_bits(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self {
            bits,
            _flag: PhantomData,
        }
    }

    pub const fn bits(self) -> u16 {
        self.bits
    }

    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn contains(self, flag: F) -> bool {
        self.bits & flag.mask() != 0
    }

    pub fn insert(&mut self, flag: F) {
        self.bits |= flag.mask();
    }

    pub fn iter(self) -> impl Iterator<Item = F> {
        F::ALL.iter().copied().filter(move |f| self.contains(*f))
    }

    /// Set bits that no named flag covers.
    pub fn unknown_bits(self) -> u16 {
        let named = F::ALL.iter().fold(0, |acc, f| acc | f.mask());
        self.bits & !named
    }

    /// Space-separated labels of the set flags, or `none` when empty.
    pub fn describe(self, none: &str) -> String {
        if self.is_empty() {
            return none.to_owned();
        }
        let mut labels: Vec<String> = self.iter().map(|f| f.label().to_owned()).collect();
        let unknown = self.unknown_bits();
        if unknown != 0 {
            labels.push(format!("Unknown(0x{unknown:04X})"));
        }
        labels.join(" ")
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Flag> fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<F: Flag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = Self::empty();
        for f in iter {
            set.insert(f);
        }
        set
    }
}

// ───────────────────────────────────────────────────────────────
// Faults (register 0x2C)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Overcurrent,
    FetShort,
    Software,
    BatteryHvd,
    ArrayHvd,
    DipSwitch,
    SettingsReset,
    RtsDisconnected,
    RtsShort,
    HeatsinkLimit,
}

impl Flag for Fault {
    const ALL: &'static [Self] = &[
        Self::Overcurrent,
        Self::FetShort,
        Self::Software,
        Self::BatteryHvd,
        Self::ArrayHvd,
        Self::DipSwitch,
        Self::SettingsReset,
        Self::RtsDisconnected,
        Self::RtsShort,
        Self::HeatsinkLimit,
    ];

    fn bit(self) -> u8 {
        self as u8
    }

    fn label(self) -> &'static str {
        match self {
            Self::Overcurrent => "Overcurrent",
            Self::FetShort => "FET-Short",
            Self::Software => "SW-Fault",
            Self::BatteryHvd => "Batt-HVD",
            Self::ArrayHvd => "Array-HVD",
            Self::DipSwitch => "DIP-SW",
            Self::SettingsReset => "Reset",
            Self::RtsDisconnected => "RTS-Disc",
            Self::RtsShort => "RTS-Short",
            Self::HeatsinkLimit => "Heatsink-Limit",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Alarms (register 0x2E)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    RtsOpen,
    RtsShort,
    RtsDisconnected,
    HeatsinkLimit,
    CurrentLimit,
    CurrentOffset,
    BatterySense,
    BatterySenseDisconnected,
    Uncalibrated,
    RtsMiswire,
    Hvd,
    LogTimeout,
    Eeprom,
}

impl Flag for Alarm {
    const ALL: &'static [Self] = &[
        Self::RtsOpen,
        Self::RtsShort,
        Self::RtsDisconnected,
        Self::HeatsinkLimit,
        Self::CurrentLimit,
        Self::CurrentOffset,
        Self::BatterySense,
        Self::BatterySenseDisconnected,
        Self::Uncalibrated,
        Self::RtsMiswire,
        Self::Hvd,
        Self::LogTimeout,
        Self::Eeprom,
    ];

    fn bit(self) -> u8 {
        self as u8
    }

    fn label(self) -> &'static str {
        match self {
            Self::RtsOpen => "RTS-Open",
            Self::RtsShort => "RTS-Short",
            Self::RtsDisconnected => "RTS-Disc",
            Self::HeatsinkLimit => "Heatsink",
            Self::CurrentLimit => "I-Limit",
            Self::CurrentOffset => "I-Offset",
            Self::BatterySense => "Batt-Sense",
            Self::BatterySenseDisconnected => "Sense-Disc",
            Self::Uncalibrated => "Uncal",
            Self::RtsMiswire => "RTS-Miswire",
            Self::Hvd => "HVD",
            Self::LogTimeout => "Log-Timeout",
            Self::Eeprom => "EEPROM",
        }
    }
}

pub type FaultFlags = FlagSet<Fault>;
pub type AlarmFlags = FlagSet<Alarm>;
