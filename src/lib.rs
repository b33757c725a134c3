//! Offline-first synchronization core for the AulaSync school platform.
//!
//! Client write paths that cannot reach the remote document store record a
//! [`models::PendingOperation`] in a local SQLite queue. The [`sync`] module
//! replays that queue against the remote store in insertion order, tracks
//! per-operation retries, and exposes the engine's current condition through
//! the [`sync::SyncCoordinator`] state machine.

pub mod commands;
pub mod config;
pub mod db;
pub mod models;
pub mod server;
pub mod sync;
