//! Durable per-key storage for window buffers.

pub mod error;
pub mod kv;

pub use error::{Result, StoreError};
pub use kv::{KvStore, StoredValue};
