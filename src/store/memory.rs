//! Unversioned, transaction-local write overlay.

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::err_at;
use crate::error::Result;
use crate::store::{DataStore, Revision, CURRENT};

/// An in-memory ordered byte map standing in for "the current state of one
/// in-flight transaction". Every record reports [CURRENT] as its revision,
/// since there is no commit yet, so it must compare as newer than anything
/// a snapshot ceiling could name.
///
/// `&self`-based like every [DataStore], so a [crate::store::ProxyDataStore]
/// can hold it behind a trait object alongside a [crate::store::RevisionDataStore];
/// interior mutability ([RefCell]) is what makes that uniform signature
/// possible for a store that otherwise has no business being `Sync`.
#[derive(Default)]
pub struct MemoryDataStore {
    map: RefCell<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDataStore {
    pub fn new() -> MemoryDataStore {
        MemoryDataStore {
            map: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }

    /// Snapshot of every record currently held, in key order.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl DataStore for MemoryDataStore {
    fn store(&self, items: &[(Vec<u8>, Vec<u8>)], _r: Revision) -> Result<()> {
        let mut map = self.map.borrow_mut();
        for (k, v) in items {
            map.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn get_item(&self, user_key: &[u8], _end_r: Revision, _start_r: Revision) -> Result<(Revision, Vec<u8>)> {
        match self.map.borrow().get(user_key) {
            Some(v) => Ok((CURRENT, v.clone())),
            None => err_at!(NotFound, msg: "key {:?} not in overlay", user_key),
        }
    }

    fn iter_items<'a>(
        &'a self,
        start_key: Option<Vec<u8>>,
        end_key: Option<Vec<u8>>,
        _end_r: Revision,
        _start_r: Revision,
    ) -> Result<Box<dyn Iterator<Item = Result<(Vec<u8>, Revision, Vec<u8>)>> + 'a>> {
        let map = self.map.borrow();
        let items: Vec<Result<(Vec<u8>, Revision, Vec<u8>)>> = map
            .range(start_key.clone().unwrap_or_default()..)
            .take_while(|(k, _)| end_key.as_ref().map(|e| *k < e).unwrap_or(true))
            .map(|(k, v)| Ok((k.clone(), CURRENT, v.clone())))
            .collect();
        Ok(Box::new(items.into_iter()))
    }
}
