//! Host task watchdog.
//!
//! A monitor thread aborts the process if the main loop stalls for longer
//! than the configured timeout. The main loop calls `feed()` on every
//! tick through [`WatchdogPort`]; a process supervisor restarts the
//! service after the abort, matching a hardware reset on the device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, info};

use crate::app::ports::WatchdogPort;

pub const DEFAULT_WATCHDOG_SECS: u64 = 120;

pub struct ThreadWatchdog {
    start: Instant,
    last_feed_ms: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl ThreadWatchdog {
    /// Start the monitor thread. The first deadline is `timeout` from now.
    pub fn start(timeout: Duration) -> std::io::Result<Self> {
        let start = Instant::now();
        let last_feed_ms = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let feed = Arc::clone(&last_feed_ms);
        let halt = Arc::clone(&stop);
        let limit_ms = timeout.as_millis() as u64;
        let poll = (timeout / 4).max(Duration::from_millis(10));
        let monitor = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                while !halt.load(Ordering::Relaxed) {
                    thread::sleep(poll);
                    let now = start.elapsed().as_millis() as u64;
                    let idle = now.saturating_sub(feed.load(Ordering::Relaxed));
                    if idle > limit_ms && !halt.load(Ordering::Relaxed) {
                        error!("Watchdog: main loop stalled for {} ms, aborting", idle);
                        log::logger().flush();
                        std::process::abort();
                    }
                }
            })?;

        info!("Watchdog: armed ({}s timeout)", timeout.as_secs());
        Ok(Self {
            start,
            last_feed_ms,
            stop,
            monitor: Some(monitor),
        })
    }

    /// Milliseconds since the last feed.
    pub fn idle_ms(&self) -> u64 {
        let now = self.start.elapsed().as_millis() as u64;
        now.saturating_sub(self.last_feed_ms.load(Ordering::Relaxed))
    }
}

impl WatchdogPort for ThreadWatchdog {
    fn feed(&mut self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_feed_ms.store(now, Ordering::Relaxed);
    }
}

impl Drop for ThreadWatchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}
