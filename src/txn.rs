//! [Transaction]: snapshot-isolated read/write surface, commit protocol
//! with conflict detection and auto-fast-forward, and the meta operations
//! that create/drop collections and indexes.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::codec::{Packer, Value, MARK_INSERT, MARK_REMOVE, TOMBSTONE};
use crate::database::{CollectionMeta, CommitRecord, Database, IndexMeta, VERSION};
use crate::entry::{BoundEntry, Entry};
use crate::err_at;
use crate::error::{Error, Result};
use crate::index::{BoundIndex, Index};
use crate::store::{DataStore, MemoryDataStore, ProxyDataStore, Revision, RevisionDataStore};

type PostCommitHook = Box<dyn FnOnce(&Database) -> Result<()>>;

/// A conflicting write: the collection, the logical pk, and the commit
/// revision that wrote it first.
pub type Conflict = (String, Value, Revision);

/// Born against a snapshot revision, dies on [Transaction::commit] or by
/// being dropped. Not `Send`/`Sync`: the public surface assumes exclusive
/// access to an in-flight transaction.
pub struct Transaction {
    database: Arc<Database>,
    snapshot_r: Revision,
    overlays: HashMap<String, MemoryDataStore>,
    updates: HashMap<String, BTreeSet<Vec<u8>>>,
    meta_cache: RefCell<HashMap<String, CollectionMeta>>,
    post_commit_hooks: Vec<PostCommitHook>,
    last_conflicts: Option<Vec<Conflict>>,
}

impl Transaction {
    pub(crate) fn new(database: Arc<Database>) -> Transaction {
        let snapshot_r = database.current_revision();
        Transaction {
            database,
            snapshot_r,
            overlays: HashMap::new(),
            updates: HashMap::new(),
            meta_cache: RefCell::new(HashMap::new()),
            post_commit_hooks: Vec::new(),
            last_conflicts: None,
        }
    }

    pub fn snapshot_revision(&self) -> Revision {
        self.snapshot_r
    }

    /// Conflicts surfaced by the most recent failed [Transaction::commit].
    pub fn conflicts(&self) -> Option<&[Conflict]> {
        self.last_conflicts.as_deref()
    }

    // -- read path ---------------------------------------------------

    pub fn get(&self, collection: &str, pk: &Value) -> Result<Value> {
        let meta = self.meta(collection)?;
        let entry = Entry::new(meta.key_packer()?, meta.value_packer()?);
        let persistent = self.database.store(collection)?;
        let proxy = self.proxy_for(collection, &persistent);
        BoundEntry::new(entry, &proxy, self.snapshot_r, 0).get(pk)
    }

    pub fn contains(&self, collection: &str, pk: &Value) -> bool {
        self.get(collection, pk).is_ok()
    }

    pub fn keys(&self, collection: &str, start: Option<&Value>, end: Option<&Value>) -> Result<Vec<Value>> {
        let meta = self.meta(collection)?;
        let entry = Entry::new(meta.key_packer()?, meta.value_packer()?);
        let persistent = self.database.store(collection)?;
        let proxy = self.proxy_for(collection, &persistent);
        BoundEntry::new(entry, &proxy, self.snapshot_r, 0).keys(start, end)
    }

    pub fn lookup(&self, collection: &str, accessor: &str, start: &Value, end: Option<&Value>) -> Result<Vec<Value>> {
        let meta = self.meta(collection)?;
        let idx_meta = meta
            .indexes
            .get(accessor)
            .ok_or_else(|| Error::UnknownIndex(format!("{}.{}", collection, accessor)))?;
        let index = Index::new(meta.key_packer()?, Packer::from_identifier(&idx_meta.value_codec)?);
        let store_name = meta.index_store_name(accessor);
        let persistent = self.database.store(&store_name)?;
        let proxy = self.proxy_for(&store_name, &persistent);
        BoundIndex::new(index, &proxy, self.snapshot_r, 0).iter_lookup_keys(start, end)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let entry = Entry::new(Packer::Str, Packer::Obj);
        let persistent = self.database.store("_meta")?;
        let proxy = self.proxy_for("_meta", &persistent);
        let keys = BoundEntry::new(entry, &proxy, self.snapshot_r, 0).keys(None, None)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| match k {
                Value::Str(s) => s.strip_prefix("collection:").map(|s| s.to_string()),
                _ => None,
            })
            .collect())
    }

    // -- write path ---------------------------------------------------

    /// `put(collection, pk, None)` is a delete.
    pub fn put(&mut self, collection: &str, pk: &Value, value: Option<&Value>) -> Result<bool> {
        self.put_with_options(collection, pk, value, true, true)
    }

    pub fn delete(&mut self, collection: &str, pk: &Value) -> Result<bool> {
        self.put(collection, pk, None)
    }

    pub fn put_with_options(
        &mut self,
        collection: &str,
        pk: &Value,
        value: Option<&Value>,
        index: bool,
        track: bool,
    ) -> Result<bool> {
        let meta = self.meta(collection)?;
        let key_codec = meta.key_packer()?;
        let value_codec = meta.value_packer()?;
        let entry = Entry::new(key_codec, value_codec);
        let db_key = entry.to_db_key(pk)?;
        let new_bytes = entry.to_db_value(value)?;

        let mut old_value: Option<Value> = None;
        if track || index {
            let persistent = self.database.store(collection)?;
            let old_bytes = {
                let proxy = self.proxy_for(collection, &persistent);
                match proxy.get_item(&db_key, self.snapshot_r, 0) {
                    Ok((_, bytes)) => Some(bytes),
                    Err(Error::NotFound(_)) => None,
                    Err(e) => return Err(e),
                }
            };
            if track && old_bytes.as_deref() == Some(new_bytes.as_slice()) {
                return Ok(false);
            }
            if index {
                if let Some(bytes) = &old_bytes {
                    if bytes.as_slice() != [TOMBSTONE] {
                        old_value = Some(value_codec.unpack(bytes, false)?);
                    }
                }
            }
        }

        self.overlay_mut(collection)
            .store(&[(db_key.clone(), new_bytes)], self.snapshot_r)?;

        if index {
            for (accessor, index_meta) in &meta.indexes {
                let idx_value_codec = Packer::from_identifier(&index_meta.value_codec)?;
                let index = Index::new(key_codec, idx_value_codec);
                let store_name = meta.index_store_name(accessor);
                let mut ops = Vec::new();
                if let Some(old) = extract_accessor(old_value.as_ref(), accessor, idx_value_codec) {
                    let (k, m) = index.prepare(&old, pk, MARK_REMOVE)?;
                    ops.push((k, vec![m]));
                }
                if let Some(new) = extract_accessor(value, accessor, idx_value_codec) {
                    let (k, m) = index.prepare(&new, pk, MARK_INSERT)?;
                    ops.push((k, vec![m]));
                }
                if !ops.is_empty() {
                    self.overlay_mut(&store_name).store(&ops, self.snapshot_r)?;
                }
            }
        }

        if track {
            self.updates.entry(collection.to_string()).or_default().insert(db_key);
        }

        Ok(true)
    }

    // -- meta operations ------------------------------------------------

    pub fn create_collection(&mut self, name: &str, key_codec: Packer, value_codec: Packer) -> Result<()> {
        match self.meta(name) {
            Ok(_) => return err_at!(DuplicateCollection, msg: "collection {:?} already exists", name),
            Err(Error::UnknownCollection(_)) => {}
            Err(e) => return Err(e),
        }
        let meta = CollectionMeta::new(name, key_codec, value_codec);
        info!(target: "txn   ", "creating collection {:?}", name);
        self.write_collection_meta(name, &meta)
    }

    pub fn drop_collection(&mut self, name: &str) -> Result<()> {
        info!(target: "txn   ", "dropping collection {:?}", name);
        let meta = self.meta(name)?;
        let key = format!("collection:{}", name);
        self.delete_meta_raw(&key)?;
        self.meta_cache.borrow_mut().remove(name);

        let data_store_name = name.to_string();
        let index_store_names: Vec<String> = meta
            .indexes
            .keys()
            .map(|accessor| meta.index_store_name(accessor))
            .collect();
        self.post_commit_hooks.push(Box::new(move |db: &Database| {
            db.drop_store(&data_store_name)?;
            for idx_name in &index_store_names {
                db.drop_store(idx_name)?;
            }
            Ok(())
        }));
        Ok(())
    }

    /// Adds an index accessor and backfills it over the collection's full
    /// revision history. Because history is newest-first per key, the
    /// first occurrence of a user key encountered is already its current
    /// value, so a single pass suffices, skipping every subsequent (older)
    /// occurrence of a key already seen.
    pub fn add_index(&mut self, collection: &str, accessor: &str, value_codec: Packer) -> Result<()> {
        let mut meta = self.meta(collection)?;
        if meta.indexes.contains_key(accessor) {
            return err_at!(DuplicateIndex, msg: "index {:?} already exists on {:?}", accessor, collection);
        }
        info!(target: "txn   ", "adding index {:?} on {:?}, backfilling history", accessor, collection);
        let key_codec = meta.key_packer()?;
        let value_packer = meta.value_packer()?;
        let persistent = self.database.store(collection)?;
        let records = persistent.iter_revisions(0, Revision::MAX)?;

        let index = Index::new(key_codec, value_codec);
        let store_name = meta.index_store_name(accessor);
        let mut seen = std::collections::HashSet::new();
        let mut ops = Vec::new();
        for (user_key, _r, raw_value) in records {
            if !seen.insert(user_key.clone()) {
                continue;
            }
            if raw_value == [TOMBSTONE] {
                continue;
            }
            let pk = key_codec.unpack(&user_key, true)?;
            let decoded = value_packer.unpack(&raw_value, false)?;
            if let Some(indexed) = extract_accessor(Some(&decoded), accessor, value_codec) {
                let (k, m) = index.prepare(&indexed, &pk, MARK_INSERT)?;
                ops.push((k, vec![m]));
            }
        }
        if !ops.is_empty() {
            self.overlay_mut(&store_name).store(&ops, self.snapshot_r)?;
        }

        meta.indexes.insert(
            accessor.to_string(),
            IndexMeta {
                value_codec: value_codec.identifier().to_string(),
            },
        );
        self.write_collection_meta(collection, &meta)
    }

    /// Drops an index accessor: removes it from the collection's metadata
    /// and queues a post-commit hook to drop its sub-store, mirroring
    /// [Transaction::drop_collection]'s hook pattern.
    pub fn drop_index(&mut self, collection: &str, accessor: &str) -> Result<()> {
        let mut meta = self.meta(collection)?;
        if meta.indexes.remove(accessor).is_none() {
            return err_at!(UnknownIndex, msg: "index {:?} not found on {:?}", accessor, collection);
        }
        info!(target: "txn   ", "dropping index {:?} on {:?}", accessor, collection);
        let store_name = meta.index_store_name(accessor);
        self.post_commit_hooks.push(Box::new(move |db: &Database| db.drop_store(&store_name)));
        self.write_collection_meta(collection, &meta)
    }

    // -- commit ----------------------------------------------------------

    pub fn commit(&mut self) -> Result<Revision> {
        loop {
            match self.database.try_claim(self.snapshot_r) {
                Ok(new_r) => {
                    self.flush(new_r)?;
                    debug!(target: "txn   ", "committed as revision {}", new_r);
                    self.snapshot_r = new_r;
                    self.last_conflicts = None;
                    return Ok(new_r);
                }
                Err(Error::RevisionStale(_)) => match self.resolve_conflicts()? {
                    None => {
                        debug!(target: "txn   ", "fast-forwarded to revision {}, retrying claim", self.snapshot_r);
                        continue;
                    }
                    Some(conflicts) => {
                        warn!(target: "txn   ", "commit conflict on {} pk(s)", conflicts.len());
                        self.last_conflicts = Some(conflicts.clone());
                        return err_at!(
                            IntegrityError,
                            msg: "commit conflicts on {} pk(s): {:?}",
                            conflicts.len(),
                            conflicts
                        );
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Fast-forwards `snapshot_r` through every intervening commit that
    /// touched disjoint pks; stops advancing as soon as one doesn't.
    /// Returns the full conflict list when any commit conflicted, or
    /// `None` once caught up with no conflicts.
    fn resolve_conflicts(&mut self) -> Result<Option<Vec<Conflict>>> {
        let latest = self.database.current_revision();
        let mut conflicts = Vec::new();
        let mut advanced_to = self.snapshot_r;
        let mut conflict_seen = false;
        for c in (self.snapshot_r + 1)..=latest {
            let record = self.read_commit_record(c)?;
            let mut this_commit_conflicted = false;
            for (collection, pks) in &self.updates {
                let their_pks = match record.updates.get(collection) {
                    Some(v) => v,
                    None => continue,
                };
                for pk_bytes in pks {
                    if their_pks.contains(pk_bytes) {
                        let pk_value = self
                            .meta(collection)
                            .and_then(|m| m.key_packer())
                            .and_then(|p| p.unpack(pk_bytes, true))
                            .unwrap_or_else(|_| Value::Str(format!("{:?}", pk_bytes)));
                        conflicts.push((collection.clone(), pk_value, c));
                        this_commit_conflicted = true;
                    }
                }
            }
            if this_commit_conflicted {
                conflict_seen = true;
            }
            if !conflict_seen {
                advanced_to = c;
            }
            if !self.database.config().auto_resolve() && this_commit_conflicted {
                break;
            }
        }
        if conflicts.is_empty() {
            self.snapshot_r = advanced_to;
            Ok(None)
        } else {
            Ok(Some(conflicts))
        }
    }

    fn flush(&mut self, r: Revision) -> Result<()> {
        let names: Vec<String> = self.overlays.keys().cloned().collect();
        for name in &names {
            let items = self.overlays.get(name).expect("just listed").entries();
            if items.is_empty() {
                continue;
            }
            let persistent = self.database.store(name)?;
            persistent.store(&items, r)?;
        }
        self.write_commit_record(r)?;
        for hook in self.post_commit_hooks.drain(..) {
            hook(&self.database)?;
        }
        self.overlays.clear();
        self.updates.clear();
        Ok(())
    }

    /// Writes `_commits[R]` then `_commits[0] = R`. The commits record is
    /// written LAST, after every touched store's data is already durable,
    /// so a reader observing `_commits[0] == R` is guaranteed to see all
    /// of commit `R`'s data.
    fn write_commit_record(&mut self, r: Revision) -> Result<()> {
        let mut updates = HashMap::new();
        for (collection, pks) in &self.updates {
            updates.insert(collection.clone(), pks.iter().cloned().collect());
        }
        let record = CommitRecord {
            updates,
            checksum: String::new(),
        };
        let commits = self.database.store("_commits")?;

        let record_value = rmpv::ext::to_value(&record).map_err(|e| Error::DataError(e.to_string()))?;
        let key = Packer::Uint32.pack(&Value::Uint32(r), true)?;
        let bytes = Packer::Obj.pack(&Value::Obj(record_value), false)?;
        commits.store(&[(key, bytes)], r)?;

        let latest_key = Packer::Uint32.pack(&Value::Uint32(0), true)?;
        let latest_bytes = Packer::Obj.pack(&Value::Obj(rmpv::Value::from(r)), false)?;
        commits.store(&[(latest_key, latest_bytes)], r)?;
        Ok(())
    }

    fn read_commit_record(&self, c: Revision) -> Result<CommitRecord> {
        let commits = self.database.store("_commits")?;
        let key = Packer::Uint32.pack(&Value::Uint32(c), true)?;
        let (_, bytes) = commits.get_item(&key, Revision::MAX, 0)?;
        match Packer::Obj.unpack(&bytes, false)? {
            Value::Obj(v) => rmpv::ext::from_value(v).map_err(|e| Error::DataError(e.to_string())),
            _ => err_at!(DataError, msg: "commit record {} is not an object", c),
        }
    }

    // -- internal plumbing ------------------------------------------------

    pub(crate) fn bootstrap_meta(&mut self) -> Result<()> {
        self.put_meta_raw("info:version", Value::Str(VERSION.to_string()), false)
    }

    /// `_meta` is stored under the `Obj` packer (it has to hold both plain
    /// strings like `info:version` and structured [CollectionMeta] records),
    /// so a bare `Value::Str` is wrapped as `Value::Obj(rmpv::Value::String)`
    /// on the way in and unwrapped back on the way out. `Packer::Obj` only
    /// ever packs `Value::Obj`.
    pub fn get_meta_raw(&self, key: &str) -> Result<Value> {
        let entry = Entry::new(Packer::Str, Packer::Obj);
        let persistent = self.database.store("_meta")?;
        let proxy = self.proxy_for("_meta", &persistent);
        let raw = BoundEntry::new(entry, &proxy, self.snapshot_r, 0).get(&Value::Str(key.to_string()))?;
        Ok(unwrap_meta_value(raw))
    }

    fn put_meta_raw(&mut self, key: &str, value: Value, track: bool) -> Result<()> {
        let entry = Entry::new(Packer::Str, Packer::Obj);
        let db_key = entry.to_db_key(&Value::Str(key.to_string()))?;
        let bytes = entry.to_db_value(Some(&wrap_meta_value(value)?))?;
        self.overlay_mut("_meta").store(&[(db_key.clone(), bytes)], self.snapshot_r)?;
        if track {
            self.updates.entry("_meta".to_string()).or_default().insert(db_key);
        }
        Ok(())
    }

    fn delete_meta_raw(&mut self, key: &str) -> Result<()> {
        let entry = Entry::new(Packer::Str, Packer::Obj);
        let db_key = entry.to_db_key(&Value::Str(key.to_string()))?;
        let bytes = entry.to_db_value(None)?;
        self.overlay_mut("_meta").store(&[(db_key.clone(), bytes)], self.snapshot_r)?;
        self.updates.entry("_meta".to_string()).or_default().insert(db_key);
        Ok(())
    }

    fn write_collection_meta(&mut self, name: &str, meta: &CollectionMeta) -> Result<()> {
        let meta_value = rmpv::ext::to_value(meta).map_err(|e| Error::DataError(e.to_string()))?;
        let key = format!("collection:{}", name);
        self.put_meta_raw(&key, Value::Obj(meta_value), true)?;
        self.meta_cache.borrow_mut().insert(name.to_string(), meta.clone());
        Ok(())
    }

    fn meta(&self, collection: &str) -> Result<CollectionMeta> {
        if let Some(m) = self.meta_cache.borrow().get(collection) {
            return Ok(m.clone());
        }
        let key = format!("collection:{}", collection);
        let value = match self.get_meta_raw(&key) {
            Ok(v) => v,
            Err(Error::NotFound(_)) => {
                return err_at!(UnknownCollection, msg: "collection {:?} not found", collection)
            }
            Err(e) => return Err(e),
        };
        let meta = match value {
            Value::Obj(v) => rmpv::ext::from_value(v).map_err(|e| Error::DataError(e.to_string()))?,
            _ => return err_at!(DataError, msg: "collection meta for {:?} is not an object", collection),
        };
        self.meta_cache.borrow_mut().insert(collection.to_string(), meta.clone());
        Ok(meta)
    }

    fn overlay_mut(&mut self, name: &str) -> &MemoryDataStore {
        self.overlays.entry(name.to_string()).or_insert_with(MemoryDataStore::new)
    }

    fn proxy_for<'a>(&'a self, store_name: &str, persistent: &'a RevisionDataStore) -> ProxyDataStore<'a> {
        let mut stack: Vec<&dyn DataStore> = Vec::new();
        if let Some(overlay) = self.overlays.get(store_name) {
            stack.push(overlay);
        }
        stack.push(persistent);
        ProxyDataStore::new(stack)
    }
}

/// Extracts the scalar named by a dotted `accessor` path out of a document
/// value, decoded as `codec`'s logical type. `None` if the path is absent
/// or the value isn't shaped as that codec expects; both cases fold into
/// "nothing to mark" for the caller's index diff.
fn extract_accessor(value: Option<&Value>, accessor: &str, codec: Packer) -> Option<Value> {
    let obj = match value? {
        Value::Obj(o) => o,
        _ => return None,
    };
    let mut cur = obj;
    for part in accessor.split('.') {
        cur = cur
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(part))
            .map(|(_, v)| v)?;
    }
    rmpv_scalar_to_value(cur, codec)
}

fn wrap_meta_value(value: Value) -> Result<Value> {
    match value {
        Value::Str(s) => Ok(Value::Obj(rmpv::Value::from(s))),
        obj @ Value::Obj(_) => Ok(obj),
        other => err_at!(DataError, msg: "meta value {:?} is neither a string nor an object", other),
    }
}

fn unwrap_meta_value(value: Value) -> Value {
    match value {
        Value::Obj(rmpv::Value::String(s)) => Value::Str(s.as_str().unwrap_or_default().to_string()),
        other => other,
    }
}

fn rmpv_scalar_to_value(v: &rmpv::Value, codec: Packer) -> Option<Value> {
    match codec {
        Packer::Str => v.as_str().map(|s| Value::Str(s.to_string())),
        Packer::Uint32 => v.as_u64().map(|n| Value::Uint32(n as u32)),
        Packer::Uint16 => v.as_u64().map(|n| Value::Uint16(n as u16)),
        Packer::Uint8 => v.as_u64().map(|n| Value::Uint8(n as u8)),
        Packer::Int32 => v.as_i64().map(|n| Value::Int32(n as i32)),
        Packer::Int16 => v.as_i64().map(|n| Value::Int16(n as i16)),
        Packer::Float => v.as_f64().map(|n| Value::Float(n as f32)),
        Packer::Dict | Packer::Obj | Packer::Revision => None,
    }
}
