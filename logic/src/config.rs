use std::time::Duration;

#[derive(Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub routing: RoutingConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lookup: LookupConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub storage: StorageConfig,
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingConfig {
    // Also called k in the original paper: bucket capacity and lookup width.
    pub bucket_size: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { bucket_size: 20 }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LookupConfig {
    // Also called alpha in the original paper: per-lookup concurrency.
    pub parallelism: usize,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub request_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            parallelism: 3,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageConfig {
    // Maximum stored value size (in bytes)
    pub max_size: usize,

    // Maximum stored lifetime
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub max_lifetime: Duration,

    // Maximum number of stored entries
    pub max_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_size: 128 * 1024, // 128 KiB
            max_lifetime: Duration::from_secs(60 * 60), // 1h
            max_entries: 1024,
        }
    }
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
