//! Relay queue ("notefile") names.
//!
//! The relay distinguishes direction purely by suffix:
//!
//! | Direction        | Suffixes         | Example          |
//! |------------------|------------------|------------------|
//! | device → relay   | `.qo` / `.qos`   | `telemetry.qo`   |
//! | relay → device   | `.qi` / `.qis`   | `config_ack.qi`  |
//!
//! A [`Notefile`] can only be built through [`Notefile::outbound`] or
//! [`Notefile::inbound`], so a send on an inbound name (or a poll on an
//! outbound one) is unrepresentable past this point.

use core::fmt;

/// Longest notefile name accepted by the relay.
pub const MAX_NOTEFILE_LEN: usize = 48;

const OUTBOUND_SUFFIXES: [&str; 2] = [".qos", ".qo"];
const INBOUND_SUFFIXES: [&str; 2] = [".qis", ".qi"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotefileError {
    Empty,
    TooLong,
    /// Contains a `:`, which the relay reserves.
    ForbiddenChar,
    /// Suffix missing or belongs to the other direction.
    WrongSuffix(Direction),
}

impl fmt::Display for NotefileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty name"),
            Self::TooLong => write!(f, "name longer than {MAX_NOTEFILE_LEN}"),
            Self::ForbiddenChar => write!(f, "name contains ':'"),
            Self::WrongSuffix(Direction::Outbound) => write!(f, "outbound name must end in .qo/.qos"),
            Self::WrongSuffix(Direction::Inbound) => write!(f, "inbound name must end in .qi/.qis"),
        }
    }
}

/// A validated queue name with a fixed direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Notefile {
    name: heapless::String<MAX_NOTEFILE_LEN>,
    direction: Direction,
}

impl Notefile {
    pub fn outbound(name: &str) -> Result<Self, NotefileError> {
        Self::validated(name, Direction::Outbound)
    }

    pub fn inbound(name: &str) -> Result<Self, NotefileError> {
        Self::validated(name, Direction::Inbound)
    }

    fn validated(name: &str, direction: Direction) -> Result<Self, NotefileError> {
        if name.is_empty() {
            return Err(NotefileError::Empty);
        }
        if name.contains(':') {
            return Err(NotefileError::ForbiddenChar);
        }
        let suffixes = match direction {
            Direction::Outbound => &OUTBOUND_SUFFIXES,
            Direction::Inbound => &INBOUND_SUFFIXES,
        };
        let stem_len = suffixes
            .iter()
            .find(|s| name.ends_with(*s))
            .map(|s| name.len() - s.len())
            .ok_or(NotefileError::WrongSuffix(direction))?;
        if stem_len == 0 {
            return Err(NotefileError::Empty);
        }
        let mut s = heapless::String::new();
        s.push_str(name).map_err(|()| NotefileError::TooLong)?;
        Ok(Self { name: s, direction })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Name without its direction suffix (`telemetry.qo` → `telemetry`).
    pub fn stem(&self) -> &str {
        let suffixes: &[&str] = match self.direction {
            Direction::Outbound => &OUTBOUND_SUFFIXES,
            Direction::Inbound => &INBOUND_SUFFIXES,
        };
        suffixes
            .iter()
            .find_map(|s| self.name.strip_suffix(*s))
            .unwrap_or(&self.name)
    }

    /// `true` for the `.qos` / `.qis` (secure) variants.
    pub fn is_secure(&self) -> bool {
        self.name.ends_with(".qos") || self.name.ends_with(".qis")
    }
}

impl fmt::Display for Notefile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ───────────────────────────────────────────────────────────────
// Well-known queues
// ───────────────────────────────────────────────────────────────

/// Logical queue pairs used by the fleet. The relay routes (operator
/// configuration) copy each `.qo` on the sender to the `.qi` of the
/// same stem on the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Server → clients, shared consolidated command queue.
    Command,
    /// Client → server.
    Telemetry,
    Alarm,
    Daily,
    ConfigAck,
    RelayForward,
    SerialLog,
    Location,
    /// Server → viewers.
    ViewerSummary,
}

impl Queue {
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Telemetry => "telemetry",
            Self::Alarm => "alarm",
            Self::Daily => "daily",
            Self::ConfigAck => "config_ack",
            Self::RelayForward => "relay_forward",
            Self::SerialLog => "serial_log",
            Self::Location => "location",
            Self::ViewerSummary => "viewer_summary",
        }
    }

    pub fn outbound(self) -> Notefile {
        let mut name = heapless::String::<MAX_NOTEFILE_LEN>::new();
        let _ = name.push_str(self.stem());
        let _ = name.push_str(".qo");
        Notefile {
            name,
            direction: Direction::Outbound,
        }
    }

    pub fn inbound(self) -> Notefile {
        let mut name = heapless::String::<MAX_NOTEFILE_LEN>::new();
        let _ = name.push_str(self.stem());
        let _ = name.push_str(".qi");
        Notefile {
            name,
            direction: Direction::Inbound,
        }
    }
}
