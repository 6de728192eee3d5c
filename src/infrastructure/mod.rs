//! Adapters behind the domain ports.

pub mod cards;
pub mod clock;
pub mod http;
pub mod in_memory;
pub mod lock;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
