//! Storage module
//!
//! Durable string-keyed storage for engine state (notification registry,
//! sync status and queue, sync history, local safety snapshot).

pub mod kv_store;

pub use kv_store::{load_json, save_json, KeyValueStore, MemoryKvStore, SqliteKvStore};
