#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod consts;
pub mod contact;
mod dht;
pub mod error;
mod id;
mod kbucket;
pub mod messaging;
pub mod rng;
mod routing_table;
mod search;
pub mod storage;

#[cfg(feature = "test-support")]
pub mod test_support;

#[cfg(all(test, feature = "test-support"))]
mod integration_tests;

pub use contact::Contact;
pub use dht::KademliaDht;
pub use error::DhtError;
pub use id::Id;
pub use search::LookupMode;
