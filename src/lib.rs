//! RepriseDB core: a multi-version, revision-ordered key-value store with
//! transactional semantics, secondary indexes, and optimistic concurrency
//! control layered over an ordered embedded key-value driver.
//!
//! Module map:
//!
//! - [codec], the sort-preserving type packers.
//! - [driver], the abstract ordered byte-KV store contract, plus the
//!   in-memory adapter this crate ships.
//! - [store]: [store::RevisionDataStore], [store::MemoryDataStore],
//!   [store::ProxyDataStore].
//! - [entry] / [index], typed views over a [store::DataStore].
//! - [txn]: [txn::Transaction], snapshot isolation, commit, conflict
//!   resolution.
//! - [database]: [database::Database], the process-wide owner of stores
//!   and the current-revision counter.

pub mod codec;
pub mod database;
pub mod driver;
pub mod entry;
pub mod error;
pub mod index;
pub mod store;
pub mod txn;

pub use database::{Config, Database};
pub use error::{Error, Result};
pub use txn::Transaction;
