//! Battery voltage monitoring.
//!
//! Classifies readings against chemistry-specific thresholds, keeps a
//! bounded time-ordered window for trend analysis, and turns state
//! changes into edge-triggered alerts.
//!
//! ```text
//!   volts ─┬─ > high ──────────────▶ High
//!          ├─ ≥ low ───────────────▶ Normal
//!          ├─ ≥ critical ──────────▶ Low
//!          ├─ ≥ dead (if defined) ─▶ Critical
//!          └─ below ───────────────▶ Dead
//! ```

use heapless::Deque;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::alarm::AlertGate;
use crate::config::BatteryConfig;

/// Readings retained at most. Long analysis windows are downsampled to
/// fit, see [`BatteryMonitor::sample_spacing_secs`].
pub const WINDOW_CAPACITY: usize = 2048;

pub const DAILY_HOURS: u16 = 24;
pub const WEEKLY_HOURS: u16 = 168;
pub const MONTHLY_HOURS: u16 = 720;

// ───────────────────────────────────────────────────────────────
// Chemistry
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryType {
    /// 12 V lead-acid (AGM, flooded, gel).
    #[default]
    LeadAcid12V,
    /// 12 V LiFePO4 (4S).
    #[serde(rename = "lifepo4_12v")]
    LiFePo4_12V,
    /// Single-cell LiPo.
    Lipo,
    Custom,
}

/// Resolved classification thresholds (volts).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryThresholds {
    pub high: f32,
    pub normal: f32,
    pub low: f32,
    pub critical: f32,
    /// Lowest named tier; `None` means anything below `critical` is dead.
    pub dead: Option<f32>,
}

impl BatteryType {
    pub const fn thresholds(self) -> BatteryThresholds {
        match self {
            Self::LeadAcid12V => BatteryThresholds {
                high: 14.8, // equalization voltage
                normal: 12.20,
                low: 12.00,
                critical: 11.80,
                dead: Some(10.50),
            },
            Self::LiFePo4_12V => BatteryThresholds {
                high: 14.8,
                normal: 13.20,
                low: 12.80,
                critical: 12.00,
                dead: Some(10.00),
            },
            Self::Lipo => BatteryThresholds {
                high: 4.6,
                normal: 3.5,
                low: 3.2,
                critical: 3.0,
                dead: None,
            },
            Self::Custom => BatteryThresholds {
                high: 15.0,
                normal: 12.0,
                low: 11.5,
                critical: 11.0,
                dead: None,
            },
        }
    }
}

// ───────────────────────────────────────────────────────────────
// State & alerts
// ───────────────────────────────────────────────────────────────

/// Health classification, ordered from worst to best-but-high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Dead,
    Critical,
    Low,
    Normal,
    High,
}

impl BatteryState {
    /// Severity rank: higher is worse. `High` is a separate axis.
    const fn severity(self) -> u8 {
        match self {
            Self::Dead => 3,
            Self::Critical => 2,
            Self::Low => 1,
            Self::Normal | Self::High => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryAlert {
    Low,
    Critical,
    High,
    Declining,
    Recovered,
}

impl BatteryAlert {
    pub const fn description(self) -> &'static str {
        match self {
            Self::Low => "Battery voltage low",
            Self::Critical => "Battery voltage CRITICAL",
            Self::High => "Battery overvoltage",
            Self::Declining => "Battery voltage declining",
            Self::Recovered => "Battery voltage recovered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    pub voltage: f32,
    pub epoch: u64,
}

/// Daily-report view of the battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatterySummary {
    pub voltage: f32,
    pub state: BatteryState,
    pub soc_percent: Option<u8>,
    pub min: f32,
    pub max: f32,
    pub avg: f32,
    pub daily_change: Option<f32>,
    pub weekly_change: Option<f32>,
    pub monthly_change: Option<f32>,
}

// ───────────────────────────────────────────────────────────────
// Monitor
// ───────────────────────────────────────────────────────────────

pub struct BatteryMonitor {
    config: BatteryConfig,
    thresholds: BatteryThresholds,
    window: Deque<BatteryReading, WINDOW_CAPACITY>,
    /// Newest reading, kept even when downsampling left it out of `window`.
    live: Option<BatteryReading>,
    /// Classification at the last `evaluate`; `None` before the first.
    last_state: Option<BatteryState>,
    declining_latched: bool,
    gate: AlertGate<BatteryAlert>,
}

impl BatteryMonitor {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            config: config.clone(),
            thresholds: config.thresholds(),
            window: Deque::new(),
            live: None,
            last_state: None,
            declining_latched: false,
            gate: AlertGate::new(u64::from(config.min_alert_interval_secs)),
        }
    }

    /// Swap in a new configuration, keeping history.
    pub fn set_config(&mut self, config: &BatteryConfig) {
        self.thresholds = config.thresholds();
        self.gate
            .set_min_interval(u64::from(config.min_alert_interval_secs));
        self.config = config.clone();
    }

    pub fn config(&self) -> &BatteryConfig {
        &self.config
    }

    pub fn thresholds(&self) -> BatteryThresholds {
        self.thresholds
    }

    /// Apply the diode-drop calibration to a raw modem reading.
    pub fn calibrate(&self, raw_voltage: f32) -> f32 {
        raw_voltage + self.config.calibration_offset
    }

    /// Minimum gap between retained readings so that
    /// `trend_analysis_hours` always fits in [`WINDOW_CAPACITY`].
    pub fn sample_spacing_secs(&self) -> u64 {
        let span = u64::from(self.config.trend_analysis_hours) * 3600;
        span.div_ceil(WINDOW_CAPACITY as u64)
    }

    /// Record a reading and evict everything older than the analysis
    /// window. Out-of-order readings (older than the newest) are dropped.
    ///
    /// A reading closer than [`Self::sample_spacing_secs`] to the last
    /// retained one only replaces the live value used for classification.
    pub fn ingest(&mut self, voltage: f32, epoch: u64) {
        if !voltage.is_finite() {
            warn!("Battery: ignoring non-finite reading");
            return;
        }
        if self.live.is_some_and(|newest| epoch < newest.epoch) {
            debug!("Battery: dropping out-of-order reading at {}", epoch);
            return;
        }
        let reading = BatteryReading { voltage, epoch };
        self.live = Some(reading);

        let due = self
            .window
            .back()
            .is_none_or(|r| epoch - r.epoch >= self.sample_spacing_secs());
        if due {
            if self.window.is_full() {
                self.window.pop_front();
            }
            // Capacity was just ensured above.
            let _ = self.window.push_back(reading);
        }

        let max_age = u64::from(self.config.trend_analysis_hours) * 3600;
        let cutoff = epoch.saturating_sub(max_age);
        while self.window.front().is_some_and(|r| r.epoch < cutoff) {
            self.window.pop_front();
        }
    }

    pub fn latest(&self) -> Option<BatteryReading> {
        self.live
    }

    /// The live reading when downsampling kept it out of the window.
    fn pending(&self) -> Option<&BatteryReading> {
        let live = self.live.as_ref()?;
        match self.window.back() {
            Some(back) if back.epoch == live.epoch => None,
            _ => Some(live),
        }
    }

    pub fn len(&self) -> usize {
        self.window.len() + usize::from(self.pending().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_none()
    }

    /// Retained readings, oldest first, ending with the live one.
    pub fn readings(&self) -> impl Iterator<Item = &BatteryReading> {
        self.window.iter().chain(self.pending())
    }

    /// Ordered threshold comparison, highest tier first.
    pub fn classify(&self, voltage: f32) -> BatteryState {
        let t = &self.thresholds;
        if voltage > t.high {
            BatteryState::High
        } else if voltage >= t.low {
            BatteryState::Normal
        } else if voltage >= t.critical {
            BatteryState::Low
        } else {
            match t.dead {
                Some(dead) if voltage >= dead => BatteryState::Critical,
                _ => BatteryState::Dead,
            }
        }
    }

    /// Voltage change between the oldest and newest reading within the
    /// last `window_hours` (relative to the newest reading). `None`
    /// with fewer than two readings in range.
    pub fn compute_trend(&self, window_hours: u16) -> Option<f32> {
        let newest = self.latest()?;
        let start = newest.epoch.saturating_sub(u64::from(window_hours) * 3600);
        let oldest = self.readings().find(|r| r.epoch >= start)?;
        if oldest.epoch == newest.epoch {
            return None;
        }
        Some(newest.voltage - oldest.voltage)
    }

    /// Evaluate the newest reading and return the alerts worth sending.
    ///
    /// State alerts are edge-triggered: they fire on the transition into
    /// a state, never while it persists. `now_secs` drives the per-kind
    /// re-alert suppression.
    pub fn evaluate(&mut self, now_secs: u64) -> heapless::Vec<BatteryAlert, 2> {
        let mut out = heapless::Vec::new();
        if !self.config.enabled {
            return out;
        }
        let Some(latest) = self.latest() else {
            return out;
        };

        let state = self.classify(latest.voltage);
        let prev = self.last_state.replace(state);
        if prev != Some(state) {
            info!(
                "Battery: {:.2}V -> {:?} (was {:?})",
                latest.voltage, state, prev
            );
            if let Some(alert) = self.transition_alert(prev, state) {
                if self.gate.should_send(alert, now_secs) {
                    let _ = out.push(alert);
                }
            }
        }

        let declining = self
            .compute_trend(WEEKLY_HOURS)
            .is_some_and(|d| d < -self.config.decline_alert_threshold);
        if declining && !self.declining_latched {
            self.declining_latched = true;
            if self.config.alert_on_declining && self.gate.should_send(BatteryAlert::Declining, now_secs) {
                let _ = out.push(BatteryAlert::Declining);
            }
        } else if !declining {
            self.declining_latched = false;
        }
        out
    }

    fn transition_alert(&self, prev: Option<BatteryState>, state: BatteryState) -> Option<BatteryAlert> {
        let c = &self.config;
        let prev_sev = prev.map_or(0, BatteryState::severity);
        match state {
            BatteryState::Dead | BatteryState::Critical if state.severity() > prev_sev => {
                c.alert_on_critical.then_some(BatteryAlert::Critical)
            }
            BatteryState::Low if prev_sev < 1 => c.alert_on_low.then_some(BatteryAlert::Low),
            BatteryState::High => c.alert_on_high.then_some(BatteryAlert::High),
            BatteryState::Normal if prev_sev > 0 => {
                c.alert_on_recovery.then_some(BatteryAlert::Recovered)
            }
            _ => None,
        }
    }

    /// Rough state-of-charge estimate for chemistries with a table.
    pub fn estimate_soc(&self, voltage: f32) -> Option<u8> {
        match self.config.battery_type {
            BatteryType::LeadAcid12V => Some(lead_acid_soc(voltage)),
            BatteryType::LiFePo4_12V => Some(lifepo4_soc(voltage)),
            BatteryType::Lipo | BatteryType::Custom => None,
        }
    }

    /// Human-readable state for reports.
    pub fn describe(&self, voltage: f32) -> &'static str {
        let t = &self.thresholds;
        match self.classify(voltage) {
            BatteryState::High => "charging/high",
            BatteryState::Normal if voltage >= t.normal => "good",
            BatteryState::Normal => "fair",
            BatteryState::Low => "low",
            BatteryState::Critical => "critical",
            BatteryState::Dead => "dead",
        }
    }

    pub fn summary(&self) -> Option<BatterySummary> {
        let latest = self.latest()?;
        let (mut min, mut max, mut sum) = (f32::MAX, f32::MIN, 0.0_f32);
        for r in self.readings() {
            min = min.min(r.voltage);
            max = max.max(r.voltage);
            sum += r.voltage;
        }
        Some(BatterySummary {
            voltage: latest.voltage,
            state: self.classify(latest.voltage),
            soc_percent: self.estimate_soc(latest.voltage),
            min,
            max,
            avg: sum / self.len() as f32,
            daily_change: self.compute_trend(DAILY_HOURS),
            weekly_change: self.compute_trend(WEEKLY_HOURS),
            monthly_change: self.compute_trend(MONTHLY_HOURS),
        })
    }
}

/// 12 V lead-acid at rest, 25 °C.
fn lead_acid_soc(v: f32) -> u8 {
    const TABLE: [(f32, u8); 10] = [
        (12.70, 100),
        (12.50, 90),
        (12.42, 80),
        (12.32, 70),
        (12.20, 60),
        (12.06, 50),
        (11.90, 40),
        (11.75, 30),
        (11.58, 20),
        (11.31, 10),
    ];
    TABLE.iter().find(|(min, _)| v >= *min).map_or(0, |(_, soc)| *soc)
}

/// LiFePO4 4S; flat curve, coarse estimate.
fn lifepo4_soc(v: f32) -> u8 {
    const TABLE: [(f32, u8); 7] = [
        (14.40, 100),
        (13.60, 90),
        (13.40, 70),
        (13.30, 50),
        (13.20, 30),
        (13.00, 20),
        (12.00, 10),
    ];
    TABLE.iter().find(|(min, _)| v >= *min).map_or(0, |(_, soc)| *soc)
}
