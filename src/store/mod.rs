//! Datastore layer: the revision-versioned persistent store, the
//! unversioned transaction-local overlay, and the proxy that merges a
//! stack of the two into one ordered view.

pub mod memory;
pub mod proxy;
pub mod revision;

pub use memory::MemoryDataStore;
pub use proxy::ProxyDataStore;
pub use revision::RevisionDataStore;

use crate::error::Result;

/// A committed revision number. `0` is reserved for the `_commits[0]`
/// "latest" pointer slot.
pub type Revision = u32;

/// Sentinel revision reported for records living in an unversioned overlay
/// ([MemoryDataStore]). There is no committed revision yet, so any snapshot
/// ceiling must treat it as "newer than everything".
pub const CURRENT: Revision = Revision::MAX;

/// Common read/write/scan surface shared by [RevisionDataStore],
/// [MemoryDataStore] and [ProxyDataStore]. `history`/`iter_prune`/
/// `iter_revisions`/`iter_get` live as inherent methods on
/// [RevisionDataStore] instead, since only the persistent store needs them.
///
/// The datastore layer is oblivious to tombstones: `value` is an opaque
/// byte string, and the caller (the Entry layer) is the one that knows
/// byte `0x00` means "deleted".
pub trait DataStore {
    /// Write `items` at revision `r`. `r` is ignored by unversioned stores.
    fn store(&self, items: &[(Vec<u8>, Vec<u8>)], r: Revision) -> Result<()>;

    /// Latest value for `user_key` visible in the window `[start_r, end_r]`.
    fn get_item(&self, user_key: &[u8], end_r: Revision, start_r: Revision) -> Result<(Revision, Vec<u8>)>;

    /// Ascending scan over distinct user keys in `[start_key, end_key)`,
    /// yielding each key's single latest revision within the window.
    fn iter_items<'a>(
        &'a self,
        start_key: Option<Vec<u8>>,
        end_key: Option<Vec<u8>>,
        end_r: Revision,
        start_r: Revision,
    ) -> Result<Box<dyn Iterator<Item = Result<(Vec<u8>, Revision, Vec<u8>)>> + 'a>>;
}
