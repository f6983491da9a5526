//! Composite secondary index encoding: physical key is
//! `value ‖ NUL ‖ pk ‖ [tail_length] ‖ inverted_revision`, physical value is
//! a one-byte insert/remove mark. Because both inserts and removes are
//! pure appends at ever-higher revisions, the newest-revision-wins scan
//! that [crate::store::RevisionDataStore] already does for primary data is
//! enough to answer "is `(value, pk)` currently a member": it is iff its
//! newest mark is `'+'`.

use crate::codec::{Packer, Value, MARK_INSERT, MARK_REMOVE};
use crate::err_at;
use crate::error::Result;
use crate::store::{DataStore, Revision};

/// Stateless encoding for one index accessor.
#[derive(Clone, Copy)]
pub struct Index {
    pk_codec: Packer,
    value_codec: Packer,
}

impl Index {
    pub fn new(pk_codec: Packer, value_codec: Packer) -> Index {
        Index { pk_codec, value_codec }
    }

    pub fn to_db_key(&self, value: &Value, pk: &Value) -> Result<Vec<u8>> {
        let mut prefix = self.value_codec.pack(value, false)?;
        prefix.push(0x00);
        self.pk_codec.append_last(&prefix, pk)
    }

    pub fn from_db_key(&self, bytes: &[u8]) -> Result<(Value, Value)> {
        let (prefix, pk) = self.pk_codec.extract_last(bytes)?;
        if prefix.last() != Some(&0x00) {
            return err_at!(DataError, msg: "index key {:?} missing NUL separator", bytes);
        }
        let value = self.value_codec.unpack(&prefix[..prefix.len() - 1], false)?;
        Ok((value, pk))
    }

    /// `[start, end)` bounds over the index sub-store. With `end_value =
    /// None`, the range covers exactly `start_value` (a single-value
    /// prefix scan).
    pub fn key_range(&self, start_value: &Value, end_value: Option<&Value>) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut lower = self.value_codec.pack(start_value, false)?;
        lower.push(0x00);
        let upper = match end_value {
            Some(end_value) => {
                let mut upper = self.value_codec.pack(end_value, false)?;
                upper.push(0x00);
                upper
            }
            None => {
                let mut upper = self.value_codec.pack(start_value, false)?;
                upper.push(0x01);
                upper
            }
        };
        Ok((lower, upper))
    }

    /// Encodes a membership mark. `mark` MUST be `'+'` or `'-'`.
    pub fn prepare(&self, value: &Value, pk: &Value, mark: u8) -> Result<(Vec<u8>, u8)> {
        if mark != MARK_INSERT && mark != MARK_REMOVE {
            return err_at!(BadMark, msg: "mark {:#x} is neither '+' nor '-'", mark);
        }
        Ok((self.to_db_key(value, pk)?, mark))
    }
}

/// An [Index] bound to a live store and a read snapshot window.
pub struct BoundIndex<'a> {
    index: Index,
    store: &'a dyn DataStore,
    end_r: Revision,
    start_r: Revision,
}

impl<'a> BoundIndex<'a> {
    pub fn new(index: Index, store: &'a dyn DataStore, end_r: Revision, start_r: Revision) -> BoundIndex<'a> {
        BoundIndex {
            index,
            store,
            end_r,
            start_r,
        }
    }

    /// pks whose newest mark within `[start_value, end_value)` is `'+'`,
    /// in `(value, pk)` order.
    pub fn iter_lookup_keys(&self, start_value: &Value, end_value: Option<&Value>) -> Result<Vec<Value>> {
        let (lower, upper) = self.index.key_range(start_value, end_value)?;
        let raw = self
            .store
            .iter_items(Some(lower), Some(upper), self.end_r, self.start_r)?;
        let mut out = Vec::new();
        for item in raw {
            let (key, _, value) = item?;
            if value.first() == Some(&MARK_INSERT) {
                let (_, pk) = self.index.from_db_key(&key)?;
                out.push(pk);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::revision::RevisionDataStore;
    use crate::driver::memory::MemoryDriver;
    use std::sync::Arc;

    fn people_name_index() -> (Index, RevisionDataStore) {
        (
            Index::new(Packer::Uint32, Packer::Str),
            RevisionDataStore::new(Arc::new(MemoryDriver::new()), "people.name"),
        )
    }

    #[test]
    fn test_to_from_db_key_roundtrip() {
        let (index, _) = people_name_index();
        let key = index.to_db_key(&Value::Str("Bob".into()), &Value::Uint32(3)).unwrap();
        let (value, pk) = index.from_db_key(&key).unwrap();
        assert_eq!(value, Value::Str("Bob".into()));
        assert_eq!(pk, Value::Uint32(3));
    }

    #[test]
    fn test_prepare_rejects_bad_mark() {
        let (index, _) = people_name_index();
        let err = index
            .prepare(&Value::Str("Bob".into()), &Value::Uint32(3), b'?')
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::BadMark(_)));
    }

    #[test]
    fn test_lookup_orders_by_value_then_pk() {
        let (index, store) = people_name_index();
        let people = [
            (3u32, "Bob"),
            (6, "Brenda"),
            (23, "Borris"),
            (9, "Andy"),
            (12, "Zavier"),
        ];
        let mut items = Vec::new();
        for (pk, name) in people {
            let (key, mark) = index
                .prepare(&Value::Str(name.into()), &Value::Uint32(pk), MARK_INSERT)
                .unwrap();
            items.push((key, vec![mark]));
        }
        store.store(&items, 1).unwrap();

        let bound = BoundIndex::new(index, &store, Revision::MAX, 0);
        let pks = bound
            .iter_lookup_keys(&Value::Str("".into()), Some(&Value::Str("~".into())))
            .unwrap();
        assert_eq!(
            pks,
            vec![
                Value::Uint32(9),
                Value::Uint32(3),
                Value::Uint32(23),
                Value::Uint32(6),
                Value::Uint32(12),
            ]
        );
    }

    #[test]
    fn test_lookup_single_value_prefix() {
        let (index, store) = people_name_index();
        let (key, mark) = index
            .prepare(&Value::Str("Bob".into()), &Value::Uint32(3), MARK_INSERT)
            .unwrap();
        store.store(&[(key, vec![mark])], 1).unwrap();
        let (key2, mark2) = index
            .prepare(&Value::Str("Borris".into()), &Value::Uint32(23), MARK_INSERT)
            .unwrap();
        store.store(&[(key2, vec![mark2])], 2).unwrap();

        let bound = BoundIndex::new(index, &store, Revision::MAX, 0);
        let pks = bound.iter_lookup_keys(&Value::Str("Bob".into()), None).unwrap();
        assert_eq!(pks, vec![Value::Uint32(3)]);
    }

    #[test]
    fn test_remove_mark_hides_entry() {
        let (index, store) = people_name_index();
        let (key, mark) = index
            .prepare(&Value::Str("Bob".into()), &Value::Uint32(3), MARK_INSERT)
            .unwrap();
        store.store(&[(key.clone(), vec![mark])], 1).unwrap();
        store.store(&[(key, vec![MARK_REMOVE])], 2).unwrap();

        let bound = BoundIndex::new(index, &store, Revision::MAX, 0);
        let pks = bound.iter_lookup_keys(&Value::Str("Bob".into()), None).unwrap();
        assert!(pks.is_empty());
    }
}
