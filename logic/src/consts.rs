/// Width of an [`crate::id::Id`] in bytes.
///
/// Fixed per network: every node participating in the same DHT must be
/// built with the same `ID_LEN`, and the same hash function must be used
/// to derive ids from keys (mixing is a [`crate::error::DhtError::ConfigError`]).
pub const ID_LEN: usize = 32;

pub const ID_LEN_BITS: usize = ID_LEN * 8;
