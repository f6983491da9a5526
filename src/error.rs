//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [Result], an alias over
//! [std::result::Result] parameterised with [Error]. Construct an [Error]
//! with the [err_at] macro rather than the variant constructors directly.
//! It stamps `file!()`/`line!()` into the message so failures can be traced
//! back to the call site that raised them.

use std::{fmt, result};

/// Result alias used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

/// Error kinds raised by the codec, store, entry/index and transaction
/// layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Commit was preempted by a conflicting prior commit; carries the
    /// conflict list as `(collection, pk, revision)` triples rendered into
    /// the message.
    IntegrityError(String),
    /// Internal: commit attempted against a stale expected revision.
    RevisionStale(String),
    /// Attempt to write a revision at or below the store's current
    /// revision. Always a caller bug.
    MonotonicityError(String),
    /// Logical key absent, or shadowed by a tombstone.
    NotFound(String),
    /// A fetched record resolved to a tombstone.
    Deleted(String),
    /// Index prepare received a mark other than `'+'`/`'-'`.
    BadMark(String),
    /// Reference to a collection that has no metadata record.
    UnknownCollection(String),
    /// Reference to an index accessor with no definition on its collection.
    UnknownIndex(String),
    /// Attempt to create a collection that already exists.
    DuplicateCollection(String),
    /// Attempt to add an index accessor that already exists.
    DuplicateIndex(String),
    /// Codec encode/decode failure.
    DataError(String),
    /// Numeric/width conversion failure.
    FailConvert(String),
    /// Driver-level I/O failure. Fatal for the current transaction.
    IOError(String),
    /// Invariant violation that should be unreachable; a programmer error.
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IntegrityError(s) => write!(f, "IntegrityError: {}", s),
            Error::RevisionStale(s) => write!(f, "RevisionStale: {}", s),
            Error::MonotonicityError(s) => write!(f, "MonotonicityError: {}", s),
            Error::NotFound(s) => write!(f, "NotFound: {}", s),
            Error::Deleted(s) => write!(f, "Deleted: {}", s),
            Error::BadMark(s) => write!(f, "BadMark: {}", s),
            Error::UnknownCollection(s) => write!(f, "UnknownCollection: {}", s),
            Error::UnknownIndex(s) => write!(f, "UnknownIndex: {}", s),
            Error::DuplicateCollection(s) => write!(f, "DuplicateCollection: {}", s),
            Error::DuplicateIndex(s) => write!(f, "DuplicateIndex: {}", s),
            Error::DataError(s) => write!(f, "DataError: {}", s),
            Error::FailConvert(s) => write!(f, "FailConvert: {}", s),
            Error::IOError(s) => write!(f, "IOError: {}", s),
            Error::Fatal(s) => write!(f, "Fatal: {}", s),
        }
    }
}

impl std::error::Error for Error {}

/// Construct an [Error], or translate a `Result`'s `Err` into one, stamping
/// `file!()`/`line!()` context into the message.
///
/// ```ignore
/// err_at!(NotFound, msg: "key {:?} not in snapshot", key)
/// err_at!(FailConvert, usize::try_from(n))
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::error::Error::$v(format!("{} {}", prefix, format!($($arg),+))))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::error::Error::$v(format!("{} {}", prefix, err)))
            }
        }
    }};
    ($v:ident) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::error::Error::$v(prefix))
    }};
}
