//! Wall-clock time derived from the relay's network time.
//!
//! The modem reports epoch seconds once it has synced. We anchor that
//! value against the monotonic clock and extrapolate in between, so the
//! relay is asked again only every [`RESYNC_INTERVAL_SECS`].

use log::{debug, info, warn};

use crate::app::ports::{ClockPort, RelayPort};

/// Re-sync cadence.
pub const RESYNC_INTERVAL_SECS: u64 = 6 * 60 * 60;

/// Retry cadence while no sync has ever succeeded.
const UNSYNCED_RETRY_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Anchor {
    epoch: u64,
    mono_ms: u64,
}

#[derive(Debug, Default)]
pub struct TimeSource {
    anchor: Option<Anchor>,
    last_attempt_ms: Option<u64>,
}

impl TimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    /// Query the relay if a sync is due. Returns `true` when the anchor
    /// was refreshed.
    pub fn sync_if_due(&mut self, io: &mut (impl RelayPort + ClockPort)) -> bool {
        let now_ms = io.monotonic_ms();
        let interval = if self.anchor.is_some() {
            RESYNC_INTERVAL_SECS
        } else {
            UNSYNCED_RETRY_SECS
        };
        if let Some(last) = self.last_attempt_ms {
            if now_ms.saturating_sub(last) < interval * 1000 {
                return false;
            }
        }
        self.last_attempt_ms = Some(now_ms);

        match io.epoch_secs() {
            Ok(Some(epoch)) => {
                if let Some(prev) = self.now_epoch_at(now_ms) {
                    let drift = epoch.abs_diff(prev);
                    if drift > 2 {
                        debug!("Time: corrected {}s of drift", drift);
                    }
                } else {
                    info!("Time: synced to epoch {}", epoch);
                }
                self.anchor = Some(Anchor {
                    epoch,
                    mono_ms: now_ms,
                });
                true
            }
            Ok(None) => {
                debug!("Time: relay has no network time yet");
                false
            }
            Err(e) => {
                warn!("Time: sync failed: {}", e);
                false
            }
        }
    }

    /// Current epoch seconds, `None` before the first sync.
    pub fn now_epoch(&self, clock: &impl ClockPort) -> Option<u64> {
        self.now_epoch_at(clock.monotonic_ms())
    }

    fn now_epoch_at(&self, mono_ms: u64) -> Option<u64> {
        self.anchor
            .map(|a| a.epoch + mono_ms.saturating_sub(a.mono_ms) / 1000)
    }
}
