//! Revision-addressed persistent datastore.
//!
//! Physical keys are `user_key ‖ inv(R)`, `inv(R) = be_u32(u32::MAX - R)`.
//! Because `inv` is a decreasing function of `R`, ascending cursor order
//! over a fixed user key visits revisions newest-first. Every read and
//! scan below leans on that.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::driver::Driver;
use crate::err_at;
use crate::error::{Error, Result};
use crate::store::{DataStore, Revision};

const REV_WIDTH: usize = 4;
/// Suffix guaranteed to sort past `inv(0)`, the maximal revision suffix for
/// any user key, used to step a cursor past every revision of one key
/// without landing back on that key's own revision-0 record.
const PAST_ALL_REVISIONS: [u8; 5] = [0xff, 0xff, 0xff, 0xff, 0x00];

fn inv(r: Revision) -> [u8; REV_WIDTH] {
    (Revision::MAX - r).to_be_bytes()
}

fn physical_key(user_key: &[u8], r: Revision) -> Vec<u8> {
    let mut k = Vec::with_capacity(user_key.len() + REV_WIDTH);
    k.extend_from_slice(user_key);
    k.extend_from_slice(&inv(r));
    k
}

fn split_physical(key: &[u8]) -> Result<(Vec<u8>, Revision)> {
    if key.len() < REV_WIDTH {
        return err_at!(DataError, msg: "physical key {:?} shorter than revision suffix", key);
    }
    let split = key.len() - REV_WIDTH;
    let suffix: [u8; REV_WIDTH] = err_at!(FailConvert, key[split..].try_into())?;
    let r = Revision::MAX - u32::from_be_bytes(suffix);
    Ok((key[..split].to_vec(), r))
}

/// One collection's (or index accessor's) persistent, versioned sub-store.
pub struct RevisionDataStore {
    driver: Arc<dyn Driver>,
    name: String,
    current_revision: AtomicU32,
}

impl RevisionDataStore {
    pub fn new(driver: Arc<dyn Driver>, name: impl Into<String>) -> RevisionDataStore {
        RevisionDataStore {
            driver,
            name: name.into(),
            current_revision: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_revision(&self) -> Revision {
        self.current_revision.load(Ordering::SeqCst)
    }

    /// All revisions of `user_key`, newest-first, within `[start_r, end_r]`.
    pub fn history(
        &self,
        user_key: &[u8],
        end_r: Revision,
        start_r: Revision,
    ) -> Result<Vec<(Revision, Vec<u8>)>> {
        let txn = self.driver.begin()?;
        let probe = physical_key(user_key, end_r);
        let cur = txn.cursor(&self.name, Some(&probe))?;
        let mut out = Vec::new();
        for item in cur {
            let (phys_key, value) = item?;
            let (uk, r) = split_physical(&phys_key)?;
            if uk != user_key || r < start_r {
                break;
            }
            out.push((r, value));
        }
        Ok(out)
    }

    /// Retain the `keep` newest revisions of every user key, deleting (and
    /// returning) the rest. Used by compaction.
    pub fn iter_prune(&self, keep: usize) -> Result<Vec<(Vec<u8>, Revision, Vec<u8>)>> {
        let txn = self.driver.begin()?;
        let cur = txn.cursor(&self.name, None)?;
        let mut pruned = Vec::new();
        let mut to_delete = Vec::new();
        let mut current_key: Option<Vec<u8>> = None;
        let mut seen = 0usize;
        for item in cur {
            let (phys_key, value) = item?;
            let (uk, r) = split_physical(&phys_key)?;
            if current_key.as_deref() != Some(uk.as_slice()) {
                current_key = Some(uk.clone());
                seen = 0;
            }
            seen += 1;
            if seen > keep {
                to_delete.push(phys_key);
                pruned.push((uk, r, value));
            }
        }
        if !to_delete.is_empty() {
            let mut txn = self.driver.begin()?;
            for k in &to_delete {
                txn.delete(&self.name, k)?;
            }
            txn.commit()?;
        }
        Ok(pruned)
    }

    /// Full scan over records whose revision lies in `[start_r, end_r]`, in
    /// physical (newest-revision-per-key-first) order. Used to rebuild an
    /// index over historical data.
    pub fn iter_revisions(
        &self,
        start_r: Revision,
        end_r: Revision,
    ) -> Result<Vec<(Vec<u8>, Revision, Vec<u8>)>> {
        let txn = self.driver.begin()?;
        let cur = txn.cursor(&self.name, None)?;
        let mut out = Vec::new();
        for item in cur {
            let (phys_key, value) = item?;
            let (uk, r) = split_physical(&phys_key)?;
            if r >= start_r && r <= end_r {
                out.push((uk, r, value));
            }
        }
        Ok(out)
    }

    /// Per-key lookups honoring the same window as [DataStore::get_item].
    /// `keys` MUST already be in ascending order.
    pub fn iter_get(
        &self,
        keys: &[Vec<u8>],
        end_r: Revision,
        start_r: Revision,
    ) -> Result<Vec<Option<(Revision, Vec<u8>)>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_item(key, end_r, start_r) {
                Ok(v) => out.push(Some(v)),
                Err(Error::NotFound(_)) => out.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

impl DataStore for RevisionDataStore {
    fn store(&self, items: &[(Vec<u8>, Vec<u8>)], r: Revision) -> Result<()> {
        let current = self.current_revision();
        if r < current {
            return err_at!(
                MonotonicityError,
                msg: "store at revision {} below current revision {} in {:?}",
                r,
                current,
                self.name
            );
        }
        let mut txn = self.driver.begin()?;
        for (user_key, value) in items {
            txn.put(&self.name, &physical_key(user_key, r), value)?;
        }
        txn.commit()?;
        self.current_revision.store(r, Ordering::SeqCst);
        Ok(())
    }

    fn get_item(&self, user_key: &[u8], end_r: Revision, start_r: Revision) -> Result<(Revision, Vec<u8>)> {
        let txn = self.driver.begin()?;
        let probe = physical_key(user_key, end_r);
        let mut cur = txn.cursor(&self.name, Some(&probe))?;
        match cur.next() {
            None => err_at!(NotFound, msg: "key {:?} not present in {:?}", user_key, self.name),
            Some(item) => {
                let (phys_key, value) = item?;
                let (uk, r) = split_physical(&phys_key)?;
                if uk != user_key || r < start_r {
                    return err_at!(NotFound, msg: "key {:?} not visible in window", user_key);
                }
                Ok((r, value))
            }
        }
    }

    fn iter_items<'a>(
        &'a self,
        start_key: Option<Vec<u8>>,
        end_key: Option<Vec<u8>>,
        end_r: Revision,
        start_r: Revision,
    ) -> Result<Box<dyn Iterator<Item = Result<(Vec<u8>, Revision, Vec<u8>)>> + 'a>> {
        let txn = self.driver.begin()?;
        Ok(Box::new(RevisionIter {
            txn,
            name: self.name.clone(),
            pos: start_key,
            end_key,
            end_r,
            start_r,
            done: false,
        }))
    }
}

/// Lazy cursor driving [RevisionDataStore::iter_items]'s window-filtered,
/// one-revision-per-key scan. After yielding a key, it skips forward past
/// every physical key for `user_key` by probing at `user_key ‖ ff ff ff ff
/// 00`; the trailing `00` guarantees the probe sorts past that key's own
/// revision-0 record.
struct RevisionIter {
    txn: Box<dyn crate::driver::Txn>,
    name: String,
    pos: Option<Vec<u8>>,
    end_key: Option<Vec<u8>>,
    end_r: Revision,
    start_r: Revision,
    done: bool,
}

impl Iterator for RevisionIter {
    type Item = Result<(Vec<u8>, Revision, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let mut cur = match self.txn.cursor(&self.name, self.pos.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let item = match cur.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(item)) => item,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            drop(cur);

            let (phys_key, value) = item;
            let (user_key, r) = match split_physical(&phys_key) {
                Ok(v) => v,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if let Some(end_key) = &self.end_key {
                if &user_key >= end_key {
                    self.done = true;
                    return None;
                }
            }

            if r > self.end_r {
                // Too new for this snapshot; jump to the newest revision of
                // this key that is still within the window.
                self.pos = Some(physical_key(&user_key, self.end_r));
                continue;
            }

            // Either yield or skip this key, but in both cases we're done
            // with every revision of it: step past them all.
            let mut probe = user_key.clone();
            probe.extend_from_slice(&PAST_ALL_REVISIONS);
            self.pos = Some(probe);

            if r < self.start_r {
                continue;
            }

            return Some(Ok((user_key, r, value)));
        }
    }
}
