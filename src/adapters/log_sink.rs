//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the console logger. A status display or dashboard bridge would
//! implement the same trait.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { role, id } => {
                info!("START | role={} id={}", role, id);
            }
            AppEvent::TimeSynced(epoch) => {
                info!("TIME  | epoch={}", epoch);
            }
            AppEvent::ConfigApplied(version) => {
                info!("CONFIG| applied v{}", version);
            }
            AppEvent::TelemetrySent { tanks } => {
                info!("TELEM | {} tank(s) reported", tanks);
            }
            AppEvent::AlarmRaised { tank, kind } => match tank {
                Some(t) => warn!("ALARM | tank {} {:?}", t, kind),
                None => warn!("ALARM | {:?}", kind),
            },
            AppEvent::RelayActuated { relay, on } => {
                info!("RELAY | {} {}", relay, if *on { "ON" } else { "OFF" });
            }
            AppEvent::RelayForwarded { requester, target } => {
                info!("RELAY | forwarded {} -> {}", requester, target);
            }
            AppEvent::DailyReportSent => {
                info!("DAILY | report sent");
            }
            AppEvent::ConfigAcked { client, version } => {
                info!("CONFIG| {} acked v{}", client, version);
            }
            AppEvent::SummaryPublished { clients } => {
                info!("FLEET | summary published, {} client(s)", clients);
            }
            AppEvent::SummaryReceived { clients } => {
                info!("FLEET | summary received, {} client(s)", clients);
            }
            AppEvent::NoteDropped { queue, reason } => {
                warn!("DROP  | {}: {}", queue.stem(), reason);
            }
        }
    }
}
