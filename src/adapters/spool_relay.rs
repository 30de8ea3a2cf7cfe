//! Spool-directory relay adapter.
//!
//! Implements [`RelayPort`] on two directories of JSON-lines files, one
//! file per notefile:
//!
//! ```text
//!   <spool>/outbox/telemetry.qo.jsonl   ← appended by send()
//!   <spool>/inbox/command.qi.jsonl      → popped by receive()
//! ```
//!
//! An external bridge moves lines between devices' spools the way the
//! cloud relay routes `.qo` to `.qi`. Inbox lines are either a bare body
//! or `{"body": …, "sender": "…"}` when the bridge knows the origin.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde_json::Value;

use crate::app::ports::{InboundNote, RelayPort};
use crate::error::TransportError;
use crate::fleet::identity::DeviceId;
use crate::fleet::notefile::{Direction, Notefile};
use crate::fleet::records::Location;

pub struct SpoolRelay {
    outbox: PathBuf,
    inbox: PathBuf,
    uid: String,
    location: Option<Location>,
    /// Pretend the modem has no network time yet.
    time_synced: bool,
}

impl SpoolRelay {
    pub fn open(root: impl AsRef<Path>, uid: impl Into<String>) -> io::Result<Self> {
        let root = root.as_ref();
        let outbox = root.join("outbox");
        let inbox = root.join("inbox");
        fs::create_dir_all(&outbox)?;
        fs::create_dir_all(&inbox)?;
        Ok(Self {
            outbox,
            inbox,
            uid: uid.into(),
            location: None,
            time_synced: true,
        })
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn set_time_synced(&mut self, synced: bool) {
        self.time_synced = synced;
    }

    fn spool_path(dir: &Path, file: &Notefile) -> PathBuf {
        dir.join(format!("{}.jsonl", file.as_str()))
    }

    fn parse_line(line: &str) -> Option<InboundNote> {
        let value: Value = serde_json::from_str(line).ok()?;
        let wrapped = value.as_object().is_some_and(|map| {
            map.contains_key("body") && map.keys().all(|k| k == "body" || k == "sender")
        });
        if !wrapped {
            return Some(InboundNote {
                body: value,
                sender: None,
            });
        }
        let sender = value
            .get("sender")
            .and_then(Value::as_str)
            .and_then(|s| DeviceId::new(s).ok());
        let body = value.get("body").cloned().unwrap_or(Value::Null);
        Some(InboundNote { body, sender })
    }
}

fn io_err(e: &io::Error) -> TransportError {
    warn!("SpoolRelay: {}", e);
    TransportError::Unreachable
}

impl RelayPort for SpoolRelay {
    fn device_uid(&mut self) -> Result<String, TransportError> {
        Ok(self.uid.clone())
    }

    fn send(&mut self, file: &Notefile, body: &Value) -> Result<(), TransportError> {
        if file.direction() != Direction::Outbound {
            return Err(TransportError::Rejected);
        }
        let line = serde_json::to_string(body).map_err(|_| TransportError::Rejected)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::spool_path(&self.outbox, file))
            .map_err(|e| io_err(&e))?;
        writeln!(out, "{}", line).map_err(|e| io_err(&e))?;
        out.sync_all().map_err(|e| io_err(&e))?;
        debug!("SpoolRelay: queued {} bytes on {}", line.len(), file);
        Ok(())
    }

    fn receive(&mut self, file: &Notefile) -> Result<Option<InboundNote>, TransportError> {
        if file.direction() != Direction::Inbound {
            return Err(TransportError::Rejected);
        }
        let path = Self::spool_path(&self.inbox, file);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&e)),
        };

        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = lines.collect();

        // Rewrite the remainder before handing the note out, so a crash
        // loses at most this one note rather than replaying it forever.
        let tmp = path.with_extension("jsonl.tmp");
        let mut remainder = rest.join("\n");
        if !remainder.is_empty() {
            remainder.push('\n');
        }
        fs::write(&tmp, remainder).map_err(|e| io_err(&e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&e))?;

        match Self::parse_line(first) {
            Some(note) => Ok(Some(note)),
            None => {
                warn!("SpoolRelay: unparseable line on {}", file);
                Ok(Some(InboundNote {
                    body: Value::String(first.to_owned()),
                    sender: None,
                }))
            }
        }
    }

    fn epoch_secs(&mut self) -> Result<Option<u64>, TransportError> {
        if !self.time_synced {
            return Ok(None);
        }
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs()))
    }

    fn location(&mut self) -> Result<Option<Location>, TransportError> {
        Ok(self.location)
    }
}
