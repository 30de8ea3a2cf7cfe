//! Periodic work scheduler.
//!
//! Two kinds of schedule drive the router's background work:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Interval  : every N seconds of monotonic time               │
//! │              (telemetry, battery poll, inbound poll, ...)    │
//! │                                                              │
//! │  Daily     : at HH:MM wall-clock time, derived from the      │
//! │              synced epoch (daily report); skipped until      │
//! │              the first time sync                             │
//! └───────────────────────────┬──────────────────────────────────┘
//!                             ▼
//!                   Scheduler::tick() -> fired tasks
//!                             ▼
//!                     FleetRouter::tick()
//! ```
//!
//! Interval schedules fire on their first tick so a freshly booted device
//! reports immediately.

use log::info;

/// Seconds per day.
pub const DAY_SECS: u64 = 86_400;

/// Maximum number of concurrent schedules (stack-allocated).
pub const MAX_SCHEDULES: usize = 8;

/// Work items the router knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    SampleTanks,
    PollBattery,
    PollSolar,
    DailyReport,
    PollInbound,
    ResendConfigs,
    PublishSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    /// Fire every `secs` seconds of monotonic time.
    Interval { secs: u32 },
    /// Fire once a day at `hour:minute` (UTC epoch alignment).
    Daily { hour: u8, minute: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub label: &'static str,
    pub task: Task,
    pub kind: ScheduleKind,
}

#[derive(Debug, Clone, Copy)]
struct ScheduleEntry {
    schedule: Schedule,
    /// Monotonic seconds (Interval) or epoch seconds (Daily).
    next_due: Option<u64>,
}

pub type Fired = heapless::Vec<Task, MAX_SCHEDULES>;

#[derive(Debug, Default)]
pub struct Scheduler {
    schedules: [Option<ScheduleEntry>; MAX_SCHEDULES],
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schedule. Returns the slot index, or `None` if full.
    pub fn add(&mut self, schedule: Schedule) -> Option<usize> {
        let (i, slot) = self
            .schedules
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())?;
        info!("Scheduler: added '{}' at slot {}", schedule.label, i);
        *slot = Some(ScheduleEntry {
            schedule,
            next_due: None,
        });
        Some(i)
    }

    /// Change the timing of `task`. Pending due times are kept when the
    /// kind is unchanged.
    pub fn set_kind(&mut self, task: Task, kind: ScheduleKind) {
        for entry in self.schedules.iter_mut().flatten() {
            if entry.schedule.task == task && entry.schedule.kind != kind {
                info!("Scheduler: '{}' now {:?}", entry.schedule.label, kind);
                entry.schedule.kind = kind;
                entry.next_due = None;
            }
        }
    }

    /// Run the task on the next tick regardless of its schedule.
    pub fn trigger(&mut self, task: Task) {
        for entry in self.schedules.iter_mut().flatten() {
            if entry.schedule.task == task {
                entry.next_due = Some(0);
            }
        }
    }

    /// Collect the tasks due at `now_secs` (monotonic) / `epoch`.
    pub fn tick(&mut self, now_secs: u64, epoch: Option<u64>) -> Fired {
        let mut fired = Fired::new();
        for entry in self.schedules.iter_mut().flatten() {
            let due = match entry.schedule.kind {
                ScheduleKind::Interval { secs } => {
                    let next = *entry.next_due.get_or_insert(now_secs);
                    if now_secs >= next {
                        entry.next_due = Some(now_secs + u64::from(secs.max(1)));
                        true
                    } else {
                        false
                    }
                }
                ScheduleKind::Daily { hour, minute } => {
                    let Some(epoch) = epoch else { continue };
                    match entry.next_due {
                        None => {
                            entry.next_due =
                                compute_next_aligned_epoch(epoch, hour, minute, DAY_SECS);
                            false
                        }
                        Some(next) if epoch >= next => {
                            entry.next_due =
                                compute_next_aligned_epoch(epoch, hour, minute, DAY_SECS);
                            true
                        }
                        Some(_) => false,
                    }
                }
            };
            if due {
                let _ = fired.push(entry.schedule.task);
            }
        }
        fired
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.schedules.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Next epoch strictly after `epoch` that falls at `hour:minute` plus a
/// whole number of `period`s from the start of `epoch`'s day.
///
/// `None` when the clock has not been set (`epoch == 0`) or `period` is 0.
pub fn compute_next_aligned_epoch(epoch: u64, hour: u8, minute: u8, period: u64) -> Option<u64> {
    if epoch == 0 || period == 0 {
        return None;
    }
    let day_start = epoch - epoch % DAY_SECS;
    let mut next = day_start + u64::from(hour) * 3600 + u64::from(minute) * 60;
    if next <= epoch {
        next += (epoch - next) / period * period + period;
    }
    Some(next)
}
