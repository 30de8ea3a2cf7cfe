//! Crash-safe document store layered over a [`StoragePort`].
//!
//! Every document is written as a verified frame to `<name>.tmp` and then
//! renamed onto `<name>` in one step, so at any instant a reader sees
//! either the previous complete document or the new one.
//!
//! ```text
//!  offset  0        4          8                      40
//!          ┌────────┬──────────┬──────────────────────┬──────────┐
//!          │ "TFS1" │ len (LE) │ SHA-256(body)        │ body ... │
//!          └────────┴──────────┴──────────────────────┴──────────┘
//! ```
//!
//! A power cut can leave a `.tmp` behind. [`AtomicStore::recover`] runs
//! at boot: a staged frame that verifies is completed, anything else is
//! discarded.

use hmac_sha256::Hash;
use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::ports::{StorageError, StoragePort};
use crate::error::StoreError;

const MAGIC: &[u8; 4] = b"TFS1";
const DIGEST_LEN: usize = 32;
pub const HEADER_LEN: usize = MAGIC.len() + 4 + DIGEST_LEN;
const TMP_SUFFIX: &str = ".tmp";

/// Outcome of a boot-time recovery scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Targets whose staged copy verified and was renamed into place.
    pub completed: Vec<String>,
    /// Staged copies that were incomplete and removed.
    pub discarded: Vec<String>,
}

pub struct AtomicStore<'a, S: StoragePort + ?Sized> {
    storage: &'a mut S,
}

impl<'a, S: StoragePort + ?Sized> AtomicStore<'a, S> {
    pub fn new(storage: &'a mut S) -> Self {
        Self { storage }
    }

    /// Replace `name` with `bytes`. On any error `name` still holds its
    /// previous content.
    pub fn write(&mut self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        check_name(name)?;
        let tmp = tmp_name(name);
        let frame = encode_frame(bytes)?;

        match self.storage.write(&tmp, &frame) {
            Ok(n) if n == frame.len() => {}
            Ok(n) => {
                warn!("Store: short write on {} ({} of {} bytes)", tmp, n, frame.len());
                let _ = self.storage.remove(&tmp);
                return Err(StoreError::WriteFailed);
            }
            Err(e) => {
                warn!("Store: write {} failed: {}", tmp, e);
                let _ = self.storage.remove(&tmp);
                return Err(StoreError::WriteFailed);
            }
        }

        if let Err(e) = self.storage.rename(&tmp, name) {
            warn!("Store: rename {} -> {} failed: {} (staged copy kept)", tmp, name, e);
            return Err(StoreError::RenameFailed);
        }
        debug!("Store: wrote {} ({} bytes)", name, bytes.len());
        Ok(())
    }

    /// Read and verify `name`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        check_name(name)?;
        let frame = self.storage.read(name).map_err(|e| match e {
            StorageError::NotFound => StoreError::NotFound,
            StorageError::Full | StorageError::IoError => StoreError::Io,
        })?;
        decode_frame(&frame).map(<[u8]>::to_vec).ok_or_else(|| {
            warn!("Store: {} failed verification", name);
            StoreError::Corrupted
        })
    }

    pub fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|_| StoreError::Io)?;
        self.write(name, &bytes)
    }

    /// Read a JSON document. A frame that verifies but does not parse is
    /// reported as [`StoreError::Corrupted`].
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        let bytes = self.read(name)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!("Store: {} does not parse: {}", name, e);
            StoreError::Corrupted
        })
    }

    pub fn remove(&mut self, name: &str) -> Result<(), StoreError> {
        check_name(name)?;
        self.storage.remove(name).map_err(|_| StoreError::Io)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.storage.exists(name)
    }

    /// Complete or discard every orphaned staging file.
    pub fn recover(&mut self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();
        let names = self.storage.list().map_err(|_| StoreError::Io)?;

        for tmp in names.iter().filter(|n| n.ends_with(TMP_SUFFIX)) {
            let target = &tmp[..tmp.len() - TMP_SUFFIX.len()];
            let verified = self
                .storage
                .read(tmp)
                .ok()
                .is_some_and(|frame| decode_frame(&frame).is_some());

            if verified && !target.is_empty() && self.storage.rename(tmp, target).is_ok() {
                info!("Store: recovered {} from staged copy", target);
                report.completed.push(target.to_owned());
            } else {
                warn!("Store: discarding incomplete {}", tmp);
                let _ = self.storage.remove(tmp);
                report.discarded.push(tmp.clone());
            }
        }
        Ok(report)
    }
}

fn tmp_name(name: &str) -> String {
    format!("{name}{TMP_SUFFIX}")
}

fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.ends_with(TMP_SUFFIX) || name.contains(['/', '\\']) {
        return Err(StoreError::InvalidName);
    }
    Ok(())
}

fn encode_frame(body: &[u8]) -> Result<Vec<u8>, StoreError> {
    let len = u32::try_from(body.len()).map_err(|_| StoreError::WriteFailed)?;
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&Hash::hash(body));
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Verified body, or `None` for any truncation, length or digest mismatch.
fn decode_frame(frame: &[u8]) -> Option<&[u8]> {
    let rest = frame.strip_prefix(MAGIC)?;
    let (len, rest) = rest.split_first_chunk::<4>()?;
    let (digest, body) = rest.split_first_chunk::<DIGEST_LEN>()?;
    if body.len() != u32::from_le_bytes(*len) as usize {
        return None;
    }
    (Hash::hash(body) == *digest).then_some(body)
}
