//! N-way merge over a stack of [DataStore]s.
//!
//! Index 0 is the highest-priority layer (typically the transaction's own
//! write overlay); the last is the lowest (typically the persistent
//! store). `store` only ever touches index 0; `get_item`/`iter_items`
//! consult every layer and let the highest-priority hit win.

use crate::err_at;
use crate::error::{Error, Result};
use crate::store::{DataStore, Revision};

/// A read-through, write-to-top view over an ordered stack of [DataStore]s.
pub struct ProxyDataStore<'a> {
    stack: Vec<&'a dyn DataStore>,
}

impl<'a> ProxyDataStore<'a> {
    pub fn new(stack: Vec<&'a dyn DataStore>) -> ProxyDataStore<'a> {
        ProxyDataStore { stack }
    }
}

impl<'a> DataStore for ProxyDataStore<'a> {
    fn store(&self, items: &[(Vec<u8>, Vec<u8>)], r: Revision) -> Result<()> {
        match self.stack.first() {
            Some(top) => top.store(items, r),
            None => err_at!(Fatal, msg: "store() on an empty ProxyDataStore stack"),
        }
    }

    fn get_item(&self, user_key: &[u8], end_r: Revision, start_r: Revision) -> Result<(Revision, Vec<u8>)> {
        for s in &self.stack {
            match s.get_item(user_key, end_r, start_r) {
                Ok(v) => return Ok(v),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        err_at!(NotFound, msg: "key {:?} not found in any layer", user_key)
    }

    fn iter_items<'b>(
        &'b self,
        start_key: Option<Vec<u8>>,
        end_key: Option<Vec<u8>>,
        end_r: Revision,
        start_r: Revision,
    ) -> Result<Box<dyn Iterator<Item = Result<(Vec<u8>, Revision, Vec<u8>)>> + 'b>> {
        let mut iters = Vec::with_capacity(self.stack.len());
        for s in &self.stack {
            let it = s.iter_items(start_key.clone(), end_key.clone(), end_r, start_r)?;
            iters.push(it.peekable());
        }
        Ok(Box::new(MergeIter { iters }))
    }
}

type SubIter<'b> = std::iter::Peekable<Box<dyn Iterator<Item = Result<(Vec<u8>, Revision, Vec<u8>)>> + 'b>>;

/// N-way ordered merge: at each step, the smallest user key across all
/// live sub-iterators wins; ties are broken by stack priority (lowest
/// index), and every iterator currently positioned on the winning key is
/// advanced, so a lower layer's shadowed revision of the same key is never
/// yielded or revisited.
struct MergeIter<'b> {
    iters: Vec<SubIter<'b>>,
}

impl<'b> Iterator for MergeIter<'b> {
    type Item = Result<(Vec<u8>, Revision, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut min_key: Option<Vec<u8>> = None;
        for it in &mut self.iters {
            match it.peek() {
                Some(Ok((k, _, _))) => {
                    if min_key.as_ref().map(|m| k < m).unwrap_or(true) {
                        min_key = Some(k.clone());
                    }
                }
                Some(Err(_)) => return it.next(),
                None => {}
            }
        }
        let min_key = min_key?;
        let mut chosen = None;
        for it in &mut self.iters {
            let at_min = matches!(it.peek(), Some(Ok((k, _, _))) if *k == min_key);
            if at_min {
                let item = it.next();
                if chosen.is_none() {
                    chosen = item;
                }
            }
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDataStore;

    #[test]
    fn test_get_item_first_hit_wins() {
        let overlay = MemoryDataStore::new();
        overlay.store(&[(b"k".to_vec(), b"overlay".to_vec())], 0).unwrap();
        let persistent = MemoryDataStore::new();
        persistent.store(&[(b"k".to_vec(), b"persistent".to_vec())], 0).unwrap();

        let proxy = ProxyDataStore::new(vec![&overlay, &persistent]);
        let (_, v) = proxy.get_item(b"k", 0, 0).unwrap();
        assert_eq!(v, b"overlay");
    }

    #[test]
    fn test_get_item_falls_through_to_lower_layer() {
        let overlay = MemoryDataStore::new();
        let persistent = MemoryDataStore::new();
        persistent.store(&[(b"k".to_vec(), b"persistent".to_vec())], 0).unwrap();

        let proxy = ProxyDataStore::new(vec![&overlay, &persistent]);
        let (_, v) = proxy.get_item(b"k", 0, 0).unwrap();
        assert_eq!(v, b"persistent");
    }

    #[test]
    fn test_iter_items_merges_and_prefers_overlay() {
        let overlay = MemoryDataStore::new();
        overlay
            .store(&[(b"b".to_vec(), b"overlay-b".to_vec())], 0)
            .unwrap();
        let persistent = MemoryDataStore::new();
        persistent
            .store(
                &[
                    (b"a".to_vec(), b"persistent-a".to_vec()),
                    (b"b".to_vec(), b"persistent-b".to_vec()),
                    (b"c".to_vec(), b"persistent-c".to_vec()),
                ],
                0,
            )
            .unwrap();

        let proxy = ProxyDataStore::new(vec![&overlay, &persistent]);
        let items: Vec<_> = proxy
            .iter_items(None, None, 0, 0)
            .unwrap()
            .map(|r| r.map(|(k, _, v)| (k, v)))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            items,
            vec![
                (b"a".to_vec(), b"persistent-a".to_vec()),
                (b"b".to_vec(), b"overlay-b".to_vec()),
                (b"c".to_vec(), b"persistent-c".to_vec()),
            ]
        );
    }
}
