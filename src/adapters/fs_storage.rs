//! Directory-backed storage adapter.
//!
//! Implements [`StoragePort`] as one file per name inside a data
//! directory. Every write is flushed with `sync_all` before it returns,
//! and renames sync the directory so the new entry survives power loss.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};

pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Open (and create if needed) the data directory.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!("FsStorage: data directory {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StorageError::IoError);
        }
        Ok(self.root.join(name))
    }

    fn sync_dir(&self) {
        if let Err(e) = File::open(&self.root).and_then(|d| d.sync_all()) {
            warn!("FsStorage: directory sync failed: {}", e);
        }
    }
}

fn map_err(e: &io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        io::ErrorKind::StorageFull => StorageError::Full,
        _ => StorageError::IoError,
    }
}

impl StoragePort for FsStorage {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path(name)?).map_err(|e| map_err(&e))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, StorageError> {
        let path = self.path(name)?;
        let mut file = File::create(&path).map_err(|e| map_err(&e))?;
        file.write_all(data).map_err(|e| {
            warn!("FsStorage: write of {} failed: {}", name, e);
            map_err(&e)
        })?;
        file.sync_all().map_err(|e| map_err(&e))?;
        Ok(data.len())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        fs::rename(self.path(from)?, self.path(to)?).map_err(|e| map_err(&e))?;
        self.sync_dir();
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_err(&e)),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_ok_and(|p| p.is_file())
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| map_err(&e))? {
            let entry = entry.map_err(|e| map_err(&e))?;
            if entry.file_type().is_ok_and(|t| t.is_file()) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
