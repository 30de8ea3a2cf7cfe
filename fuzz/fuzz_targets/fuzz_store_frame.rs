//! Fuzz target: `AtomicStore::read` on arbitrary stored bytes.
//!
//! A frame either verifies or is reported as corrupted; it never panics.
//! A frame that verifies must be exactly what a write of its body
//! produces.
//!
//! cargo fuzz run fuzz_store_frame

#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use tankfleet::app::ports::{StorageError, StoragePort};
use tankfleet::error::StoreError;
use tankfleet::store::AtomicStore;

#[derive(Default)]
struct MemStore(BTreeMap<String, Vec<u8>>);

impl StoragePort for MemStore {
    fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.0.get(name).cloned().ok_or(StorageError::NotFound)
    }
    fn write(&mut self, name: &str, data: &[u8]) -> Result<usize, StorageError> {
        self.0.insert(name.to_owned(), data.to_vec());
        Ok(data.len())
    }
    fn rename(&mut self, from: &str, to: &str) -> Result<(), StorageError> {
        let data = self.0.remove(from).ok_or(StorageError::NotFound)?;
        self.0.insert(to.to_owned(), data);
        Ok(())
    }
    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.0.remove(name);
        Ok(())
    }
    fn exists(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.0.keys().cloned().collect())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut mem = MemStore::default();
    mem.0.insert("doc".to_owned(), data.to_vec());

    match AtomicStore::new(&mut mem).read("doc") {
        Ok(body) => {
            let mut fresh = MemStore::default();
            AtomicStore::new(&mut fresh).write("doc", &body).unwrap();
            assert_eq!(fresh.0["doc"], data);
        }
        Err(e) => assert_eq!(e, StoreError::Corrupted),
    }

    // A stray staging file must be either completed or discarded.
    mem.0.insert("doc.tmp".to_owned(), data.to_vec());
    let report = AtomicStore::new(&mut mem).recover().unwrap();
    assert_eq!(report.completed.len() + report.discarded.len(), 1);
    assert!(!mem.0.contains_key("doc.tmp"));
});
