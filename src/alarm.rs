//! Alarm evaluation shared by the monitors.
//!
//! Two pieces:
//!
//! - [`AlertGate`]: per-kind re-alert suppression. A kind that was sent
//!   less than `min_interval` seconds ago is dropped.
//! - [`TankAlarms`]: high/low level alarms with a hysteresis band. A
//!   tank latches into `High` or `Low` and only returns to `Normal` once
//!   the level has moved back past the threshold by `hysteresis_in`.
//!
//! Both are edge-triggered: callers act on transitions, not on levels.

use heapless::LinearMap;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_TANKS, TankConfig};

/// Distinct alert kinds a single gate can track.
const GATE_SLOTS: usize = 16;

// ───────────────────────────────────────────────────────────────
// AlertGate
// ───────────────────────────────────────────────────────────────

pub struct AlertGate<K: Eq> {
    min_interval_secs: u64,
    last_sent: LinearMap<K, u64, GATE_SLOTS>,
}

impl<K: Eq + Copy + core::fmt::Debug> AlertGate<K> {
    pub fn new(min_interval_secs: u64) -> Self {
        Self {
            min_interval_secs,
            last_sent: LinearMap::new(),
        }
    }

    pub fn set_min_interval(&mut self, secs: u64) {
        self.min_interval_secs = secs;
    }

    /// Returns `true` (and records `now_secs`) if `kind` may be sent.
    pub fn should_send(&mut self, kind: K, now_secs: u64) -> bool {
        if let Some(&last) = self.last_sent.get(&kind) {
            if now_secs.saturating_sub(last) < self.min_interval_secs {
                info!(
                    "AlertGate: suppressing {:?} (sent {}s ago)",
                    kind,
                    now_secs.saturating_sub(last)
                );
                return false;
            }
        }
        if self.last_sent.insert(kind, now_secs).is_err() {
            warn!("AlertGate: slot table full, {:?} not tracked", kind);
        }
        true
    }

    /// Forget the send history (e.g. after a config change).
    pub fn reset(&mut self) {
        self.last_sent.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Tank level alarms
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelState {
    #[default]
    Normal,
    High,
    Low,
    /// The sensor produced no valid reading.
    SensorFault,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChange {
    pub tank: u8,
    pub from: LevelState,
    pub to: LevelState,
    /// Level that caused the change; `None` for sensor faults.
    pub level_in: Option<f32>,
}

#[derive(Default)]
pub struct TankAlarms {
    states: LinearMap<u8, LevelState, MAX_TANKS>,
}

impl TankAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, tank: u8) -> LevelState {
        self.states.get(&tank).copied().unwrap_or_default()
    }

    /// Feed one sample (`None` = invalid reading) and report a change.
    pub fn evaluate(&mut self, tank: &TankConfig, level_in: Option<f32>) -> Option<LevelChange> {
        let from = self.state(tank.id);
        let to = match level_in {
            None => LevelState::SensorFault,
            Some(level) => next_state(tank, from, level),
        };
        if to == from {
            return None;
        }
        if self.states.insert(tank.id, to).is_err() {
            warn!("TankAlarms: too many tanks, tank {} not tracked", tank.id);
            return None;
        }
        info!("TankAlarms: tank {} {:?} -> {:?}", tank.id, from, to);
        Some(LevelChange {
            tank: tank.id,
            from,
            to,
            level_in,
        })
    }

    /// Drop state for tanks no longer configured.
    pub fn retain(&mut self, tanks: &[TankConfig]) {
        let stale: heapless::Vec<u8, MAX_TANKS> = self
            .states
            .keys()
            .filter(|id| !tanks.iter().any(|t| t.id == **id))
            .copied()
            .collect();
        for id in stale {
            self.states.remove(&id);
        }
    }
}

fn next_state(tank: &TankConfig, from: LevelState, level: f32) -> LevelState {
    let h = tank.hysteresis_in;
    let above_high = |band: f32| tank.high_alarm_in.is_some_and(|hi| level >= hi - band);
    let below_low = |band: f32| tank.low_alarm_in.is_some_and(|lo| level <= lo + band);

    match from {
        // Latched states hold until the level leaves the hysteresis band.
        LevelState::High if above_high(h) => LevelState::High,
        LevelState::Low if below_low(h) => LevelState::Low,
        _ if above_high(0.0) => LevelState::High,
        _ if below_low(0.0) => LevelState::Low,
        _ => LevelState::Normal,
    }
}
