//! In-memory [super::Driver] adapter.
//!
//! Each named sub-store is an independently-locked [BTreeMap] rather than
//! everything sitting behind one global mutex, so a transaction only
//! contends with concurrent writers of the stores it actually touches.
//! [MemoryDriver] itself is a thin handle over shared state, cheap to
//! clone, so a [Txn] never has to borrow the driver that created it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use log::error;

use crate::driver::{Cursor, Driver, Txn};
use crate::err_at;
use crate::error::Result;

type Store = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

#[derive(Default)]
struct Inner {
    stores: RwLock<HashMap<String, Store>>,
}

impl Inner {
    fn store(&self, name: &str) -> Result<Store> {
        if let Some(s) = err_at!(Fatal, self.stores.read())?.get(name) {
            return Ok(Arc::clone(s));
        }
        let mut stores = err_at!(Fatal, self.stores.write()).map_err(|e| {
            error!(target: "drv   ", "poisoned sub-store directory lock: {}", e);
            e
        })?;
        let entry = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())));
        Ok(Arc::clone(entry))
    }
}

/// A [Driver] backed by `BTreeMap`s resident in process memory. No
/// durability guarantees: the whole database is lost on process exit.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<Inner>,
}

impl Default for MemoryDriver {
    fn default() -> MemoryDriver {
        MemoryDriver::new()
    }
}

impl MemoryDriver {
    pub fn new() -> MemoryDriver {
        MemoryDriver {
            inner: Arc::new(Inner::default()),
        }
    }
}

impl Driver for MemoryDriver {
    fn begin(&self) -> Result<Box<dyn Txn>> {
        Ok(Box::new(MemoryTxn {
            inner: Arc::clone(&self.inner),
            writes: HashMap::new(),
            deletes: HashMap::new(),
        }))
    }

    fn drop_store(&self, store: &str) -> Result<()> {
        let mut stores = err_at!(Fatal, self.inner.stores.write())?;
        stores.remove(store);
        Ok(())
    }
}

/// Write-buffered transaction over a [MemoryDriver].
///
/// Reads see the transaction's own buffered writes first, then fall
/// through to the committed store; nothing is visible to other
/// transactions until [Txn::commit] applies the buffers under each
/// touched store's write lock.
pub struct MemoryTxn {
    inner: Arc<Inner>,
    writes: HashMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    deletes: HashMap<String, BTreeSet<Vec<u8>>>,
}

impl Txn for MemoryTxn {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(v) = self.writes.get(store).and_then(|m| m.get(key)) {
            return Ok(Some(v.clone()));
        }
        if self
            .deletes
            .get(store)
            .map(|s| s.contains(key))
            .unwrap_or(false)
        {
            return Ok(None);
        }
        let s = self.inner.store(store)?;
        let guard = err_at!(Fatal, s.read())?;
        Ok(guard.get(key).cloned())
    }

    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.deletes
            .entry(store.to_string())
            .or_default()
            .remove(key);
        self.writes
            .entry(store.to_string())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, store: &str, key: &[u8]) -> Result<()> {
        self.writes.entry(store.to_string()).or_default().remove(key);
        self.deletes
            .entry(store.to_string())
            .or_default()
            .insert(key.to_vec());
        Ok(())
    }

    fn cursor(&self, store: &str, from: Option<&[u8]>) -> Result<Box<dyn Cursor>> {
        let s = self.inner.store(store)?;
        let guard = err_at!(Fatal, s.read())?;
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = guard
            .range(from.map(|f| f.to_vec()).unwrap_or_default()..)
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        if let Some(overlay) = self.writes.get(store) {
            for (k, v) in overlay {
                if from.map(|f| k.as_slice() >= f).unwrap_or(true) {
                    merged.insert(k.clone(), Some(v.clone()));
                }
            }
        }
        if let Some(dels) = self.deletes.get(store) {
            for k in dels {
                if from.map(|f| k.as_slice() >= f).unwrap_or(true) {
                    merged.insert(k.clone(), None);
                }
            }
        }
        let items: Vec<Result<(Vec<u8>, Vec<u8>)>> = merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| Ok((k, v))))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn commit(self: Box<Self>) -> Result<()> {
        for (store, puts) in self.writes {
            let s = self.inner.store(&store)?;
            let mut guard = err_at!(Fatal, s.write())?;
            for (k, v) in puts {
                guard.insert(k, v);
            }
        }
        for (store, dels) in self.deletes {
            let s = self.inner.store(&store)?;
            let mut guard = err_at!(Fatal, s.write())?;
            for k in dels {
                guard.remove(&k);
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
