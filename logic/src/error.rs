use thiserror::Error;

/// Error taxonomy per spec.md §7.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DhtError {
    /// The routing table was empty at the start of a lookup.
    #[error("no known contacts to seed the lookup")]
    NoKnownContacts,

    /// Every replication RPC of a `store` failed.
    #[error("store failed: every replication rpc failed")]
    StoreFailed,

    /// A single RPC failed (timeout or transport error).
    #[error("peer unreachable")]
    Unreachable,

    /// e.g. a reply carried a mismatched `HashSize`.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A bug: a bucket grew past `k`, a duplicate id was stored, etc.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}
