//! Storage-driver abstraction.
//!
//! Everything above this layer, [crate::store], [crate::entry],
//! [crate::index], [crate::txn], [crate::database], only ever talks to an
//! ordered byte-string key/value space through these three traits. Shipping
//! a disk-backed driver (an LSM tree, a B-tree, anything of that shape) is a
//! matter of implementing them; this crate ships one adapter,
//! [memory::MemoryDriver], that keeps everything resident.

pub mod memory;

use crate::error::Result;

/// A named, ordered byte-string key/value space plus the ability to open
/// transactions over it.
///
/// "Named sub-store" is how collections and their indexes are kept apart:
/// `_meta`, `_commits`, and each collection's live data and index sub-stores
/// are separate [Driver] namespaces, never sharing a key space. Driver
/// transactions are short-lived and ephemeral; callers open one per logical
/// operation rather than holding one for the life of the process.
pub trait Driver: Send + Sync {
    fn begin(&self) -> Result<Box<dyn Txn>>;

    /// Remove all data for `store`. Used by collection/index drop.
    fn drop_store(&self, store: &str) -> Result<()>;
}

/// A single transaction against a [Driver].
///
/// Mutations are buffered until [Txn::commit]; a transaction dropped
/// without committing has no effect, and its writes are never visible to
/// any other transaction.
pub trait Txn {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, store: &str, key: &[u8]) -> Result<()>;

    /// Ordered cursor over `store`, starting at the first key `>= from`
    /// (or at the first key in the store when `from` is `None`). Cursors
    /// are materialized snapshots, not live views, so they outlive the
    /// `Txn` borrow that created them and callers can reposition freely.
    fn cursor(&self, store: &str, from: Option<&[u8]>) -> Result<Box<dyn Cursor>>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// A forward-only, ordered iterator over one [Driver] sub-store.
///
/// `Cursor` is plain [Iterator] so callers compose it with the standard
/// adaptors (`take_while`, `peekable`, ...) instead of a bespoke walk API.
pub trait Cursor: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

impl<T: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>>> Cursor for T {}
