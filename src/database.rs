//! [Database]: lifetime owner of the driver, the cached persistent stores,
//! and the single `current_revision` atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::codec::{Packer, Value};
use crate::driver::Driver;
use crate::err_at;
use crate::error::{Error, Result};
use crate::store::{DataStore, Revision, RevisionDataStore};
use crate::txn::Transaction;

/// Version string stamped into `_meta["info:version"]` on first open.
pub const VERSION: &str = "0.1.1";

/// Builder for the handful of engine-wide policy knobs, using
/// `set_*(&mut self, ...) -> &mut Self` setters so calls chain.
#[derive(Clone, Debug)]
pub struct Config {
    auto_resolve: bool,
}

impl Config {
    pub fn new() -> Config {
        Config { auto_resolve: true }
    }

    /// When `true` (the default), a commit that finds intervening commits
    /// touching disjoint collections/pks auto-fast-forwards instead of
    /// failing. Set `false` to make every commit fail on ANY intervening
    /// commit, conflicting or not.
    pub fn set_auto_resolve(&mut self, auto_resolve: bool) -> &mut Self {
        self.auto_resolve = auto_resolve;
        self
    }

    pub fn auto_resolve(&self) -> bool {
        self.auto_resolve
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// One index accessor's persisted description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexMeta {
    pub value_codec: String,
}

/// A collection's persisted description, the `_meta["collection:<name>"]`
/// record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionMeta {
    pub name: String,
    pub key_codec: String,
    pub value_codec: String,
    pub indexes: HashMap<String, IndexMeta>,
}

impl CollectionMeta {
    pub fn new(name: impl Into<String>, key_codec: Packer, value_codec: Packer) -> CollectionMeta {
        CollectionMeta {
            name: name.into(),
            key_codec: key_codec.identifier().to_string(),
            value_codec: value_codec.identifier().to_string(),
            indexes: HashMap::new(),
        }
    }

    pub fn key_packer(&self) -> Result<Packer> {
        Packer::from_identifier(&self.key_codec)
    }

    pub fn value_packer(&self) -> Result<Packer> {
        Packer::from_identifier(&self.value_codec)
    }

    /// Name of the driver sub-store backing index accessor `accessor`.
    pub fn index_store_name(&self, accessor: &str) -> String {
        format!("{}.{}", self.name, accessor)
    }
}

/// One committed revision's record, `_commits[R]`.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CommitRecord {
    /// collection name -> encoded pks touched in this commit.
    pub updates: HashMap<String, Vec<Vec<u8>>>,
    pub checksum: String,
}

/// Owns the driver, the per-sub-store [RevisionDataStore] cache, and the
/// single `current_revision` CAS point: the only writable singleton,
/// mutated solely through [Database::try_claim].
pub struct Database {
    driver: Arc<dyn Driver>,
    current_revision: AtomicU32,
    stores: RwLock<HashMap<String, Arc<RevisionDataStore>>>,
    config: Config,
}

impl Database {
    /// Opens (and, on a fresh driver, bootstraps) a database.
    pub fn open(driver: Arc<dyn Driver>) -> Result<Arc<Database>> {
        Database::with_config(driver, Config::default())
    }

    pub fn with_config(driver: Arc<dyn Driver>, config: Config) -> Result<Arc<Database>> {
        let latest = Self::read_latest_revision(&driver)?;
        let db = Arc::new(Database {
            driver,
            current_revision: AtomicU32::new(latest),
            stores: RwLock::new(HashMap::new()),
            config,
        });
        if latest == 0 {
            info!(target: "db    ", "bootstrapping fresh database, writing info:version");
            db.bootstrap()?;
        } else {
            info!(target: "db    ", "opened database at revision {}", latest);
        }
        Ok(db)
    }

    fn read_latest_revision(driver: &Arc<dyn Driver>) -> Result<Revision> {
        let commits = RevisionDataStore::new(Arc::clone(driver), "_commits");
        let key = Packer::Uint32.pack(&Value::Uint32(0), true)?;
        match commits.get_item(&key, Revision::MAX, 0) {
            Ok((_, bytes)) => {
                let v = Packer::Obj.unpack(&bytes, false)?;
                match v {
                    Value::Obj(rmpv::Value::Integer(i)) => {
                        err_at!(FailConvert, u32::try_from(i.as_u64().unwrap_or(0)))
                    }
                    _ => err_at!(DataError, msg: "_commits[0] is not an integer"),
                }
            }
            Err(Error::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn bootstrap(self: &Arc<Database>) -> Result<()> {
        let mut txn = self.begin();
        txn.bootstrap_meta()?;
        txn.commit()?;
        Ok(())
    }

    /// Cached [RevisionDataStore] handle for a named sub-store, creating
    /// one on first access.
    pub fn store(&self, name: &str) -> Result<Arc<RevisionDataStore>> {
        if let Some(s) = err_at!(Fatal, self.stores.read())?.get(name) {
            return Ok(Arc::clone(s));
        }
        let mut stores = err_at!(Fatal, self.stores.write())?;
        let entry = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RevisionDataStore::new(Arc::clone(&self.driver), name)));
        Ok(Arc::clone(entry))
    }

    pub fn drop_store(&self, name: &str) -> Result<()> {
        info!(target: "db    ", "dropping sub-store {:?}", name);
        err_at!(Fatal, self.stores.write())?.remove(name);
        self.driver.drop_store(name)
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn current_revision(&self) -> Revision {
        self.current_revision.load(Ordering::SeqCst)
    }

    /// Compare-and-set the revision counter. The ONLY place
    /// `current_revision` is mutated.
    pub fn try_claim(&self, expected: Revision) -> Result<Revision> {
        let next = expected + 1;
        match self
            .current_revision
            .compare_exchange(expected, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                debug!(target: "db    ", "claimed revision {}", next);
                Ok(next)
            }
            Err(actual) => err_at!(
                RevisionStale,
                msg: "expected revision {} to commit next but current is {}",
                expected,
                actual
            ),
        }
    }

    /// Begins a new transaction snapshotted at the current revision.
    pub fn begin(self: &Arc<Database>) -> Transaction {
        Transaction::new(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;

    #[test]
    fn test_open_bootstraps_version_record() {
        let db = Database::open(Arc::new(MemoryDriver::new())).unwrap();
        assert_eq!(db.current_revision(), 1);
        let txn = db.begin();
        assert_eq!(
            txn.get_meta_raw("info:version").unwrap(),
            Value::Str(VERSION.to_string())
        );
    }

    #[test]
    fn test_reopen_does_not_rebootstrap() {
        let driver = Arc::new(MemoryDriver::new());
        let db1 = Database::open(Arc::clone(&driver) as Arc<dyn Driver>).unwrap();
        assert_eq!(db1.current_revision(), 1);
        let db2 = Database::open(driver as Arc<dyn Driver>).unwrap();
        assert_eq!(db2.current_revision(), 1);
    }

    #[test]
    fn test_try_claim_cas() {
        let db = Database::open(Arc::new(MemoryDriver::new())).unwrap();
        let r0 = db.current_revision();
        let r1 = db.try_claim(r0).unwrap();
        assert_eq!(r1, r0 + 1);
        assert!(db.try_claim(r0).is_err());
    }
}
