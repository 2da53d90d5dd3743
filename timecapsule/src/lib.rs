//! Time capsule core
//!
//! Letters written to a future self: validation and lock rules, local
//! notifications, offline-first sync and versioned backups. The binary in
//! `main.rs` wires these into a long-running daemon.

pub mod app;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod remote;
pub mod services;
pub mod storage;
