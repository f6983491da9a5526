//! Typed primary-key entity layered over a [crate::store::DataStore].

use crate::codec::{Packer, Value, TOMBSTONE};
use crate::err_at;
use crate::error::{Error, Result};
use crate::store::{DataStore, Revision};

/// Stateless pk/value codec pair. Pure functions only, no store access,
/// so the same `Entry` describes both the live read path and any
/// offline tooling that needs to decode raw bytes.
#[derive(Clone, Copy)]
pub struct Entry {
    key_codec: Packer,
    value_codec: Packer,
}

impl Entry {
    pub fn new(key_codec: Packer, value_codec: Packer) -> Entry {
        Entry {
            key_codec,
            value_codec,
        }
    }

    pub fn to_db_key(&self, pk: &Value) -> Result<Vec<u8>> {
        self.key_codec.pack(pk, true)
    }

    pub fn from_db_key(&self, bytes: &[u8]) -> Result<Value> {
        self.key_codec.unpack(bytes, true)
    }

    /// `None` encodes the tombstone sentinel.
    pub fn to_db_value(&self, value: Option<&Value>) -> Result<Vec<u8>> {
        match value {
            None => Ok(vec![TOMBSTONE]),
            Some(v) => self.value_codec.pack(v, false),
        }
    }

    /// Raises [Error::Deleted] on the tombstone byte.
    pub fn from_db_value(&self, bytes: &[u8]) -> Result<Value> {
        if bytes == [TOMBSTONE] {
            return err_at!(Deleted, msg: "value is a tombstone");
        }
        self.value_codec.unpack(bytes, false)
    }

    fn is_tombstone(bytes: &[u8]) -> bool {
        bytes == [TOMBSTONE]
    }
}

/// An [Entry] bound to a live store and a read snapshot window.
pub struct BoundEntry<'a> {
    entry: Entry,
    store: &'a dyn DataStore,
    end_r: Revision,
    start_r: Revision,
}

impl<'a> BoundEntry<'a> {
    pub fn new(entry: Entry, store: &'a dyn DataStore, end_r: Revision, start_r: Revision) -> BoundEntry<'a> {
        BoundEntry {
            entry,
            store,
            end_r,
            start_r,
        }
    }

    /// Fetches `pk`. A tombstone (whether live in this window or simply
    /// absent) is reported as [Error::NotFound].
    pub fn get(&self, pk: &Value) -> Result<Value> {
        let key = self.entry.to_db_key(pk)?;
        match self.store.get_item(&key, self.end_r, self.start_r) {
            Ok((_, bytes)) => {
                if Entry::is_tombstone(&bytes) {
                    err_at!(NotFound, msg: "key {:?} is deleted", pk)
                } else {
                    self.entry.value_codec.unpack(&bytes, false)
                }
            }
            Err(Error::NotFound(_)) => err_at!(NotFound, msg: "key {:?} not found", pk),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, pk: &Value) -> bool {
        self.get(pk).is_ok()
    }

    /// Ascending `(pk, value)` pairs in `[start, end)`, tombstones filtered.
    pub fn iter_items<'b>(
        &'b self,
        start: Option<&Value>,
        end: Option<&Value>,
    ) -> Result<Box<dyn Iterator<Item = Result<(Value, Value)>> + 'b>> {
        let start_key = start.map(|v| self.entry.to_db_key(v)).transpose()?;
        let end_key = end.map(|v| self.entry.to_db_key(v)).transpose()?;
        let raw = self
            .store
            .iter_items(start_key, end_key, self.end_r, self.start_r)?;
        let entry = self.entry;
        Ok(Box::new(raw.filter_map(move |item| match item {
            Ok((key, _, value)) => {
                if Entry::is_tombstone(&value) {
                    None
                } else {
                    Some(
                        entry
                            .from_db_key(&key)
                            .and_then(|pk| entry.value_codec.unpack(&value, false).map(|v| (pk, v))),
                    )
                }
            }
            Err(e) => Some(Err(e)),
        })))
    }

    pub fn keys<'b>(
        &'b self,
        start: Option<&Value>,
        end: Option<&Value>,
    ) -> Result<Vec<Value>> {
        self.iter_items(start, end)?
            .map(|r| r.map(|(k, _)| k))
            .collect()
    }

    pub fn iter_values<'b>(
        &'b self,
        start: Option<&Value>,
        end: Option<&Value>,
    ) -> Result<Vec<Value>> {
        self.iter_items(start, end)?
            .map(|r| r.map(|(_, v)| v))
            .collect()
    }

    /// Encodes `mapping` and delegates to `datastore.store` at revision `r`.
    /// `None` values write tombstones.
    pub fn bulk_put(&self, mapping: &[(Value, Option<Value>)], r: Revision) -> Result<()> {
        let mut items = Vec::with_capacity(mapping.len());
        for (pk, value) in mapping {
            let key = self.entry.to_db_key(pk)?;
            let bytes = self.entry.to_db_value(value.as_ref())?;
            items.push((key, bytes));
        }
        self.store.store(&items, r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDataStore;

    fn make() -> (Entry, MemoryDataStore) {
        (Entry::new(Packer::Uint32, Packer::Str), MemoryDataStore::new())
    }

    #[test]
    fn test_to_from_db_key() {
        let (entry, _) = make();
        let key = entry.to_db_key(&Value::Uint32(7)).unwrap();
        assert_eq!(entry.from_db_key(&key).unwrap(), Value::Uint32(7));
    }

    #[test]
    fn test_to_from_db_value_and_tombstone() {
        let (entry, _) = make();
        let bytes = entry.to_db_value(Some(&Value::Str("hi".into()))).unwrap();
        assert_eq!(entry.from_db_value(&bytes).unwrap(), Value::Str("hi".into()));

        let tombstone = entry.to_db_value(None).unwrap();
        assert!(matches!(entry.from_db_value(&tombstone), Err(Error::Deleted(_))));
    }

    #[test]
    fn test_bound_entry_get_and_delete() {
        let (entry, store) = make();
        let bound = BoundEntry::new(entry, &store, Revision::MAX, 0);
        bound
            .bulk_put(&[(Value::Uint32(1), Some(Value::Str("Bob".into())))], 0)
            .unwrap();
        assert_eq!(bound.get(&Value::Uint32(1)).unwrap(), Value::Str("Bob".into()));

        bound.bulk_put(&[(Value::Uint32(1), None)], 0).unwrap();
        assert!(matches!(bound.get(&Value::Uint32(1)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_bound_entry_iter_items_filters_tombstones() {
        let (entry, store) = make();
        let bound = BoundEntry::new(entry, &store, Revision::MAX, 0);
        bound
            .bulk_put(
                &[
                    (Value::Uint32(1), Some(Value::Str("Bob".into()))),
                    (Value::Uint32(2), Some(Value::Str("Fred".into()))),
                    (Value::Uint32(3), None),
                ],
                0,
            )
            .unwrap();
        let keys = bound.keys(None, None).unwrap();
        assert_eq!(keys, vec![Value::Uint32(1), Value::Uint32(2)]);
    }
}
