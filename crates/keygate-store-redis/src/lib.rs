//! Redis backend for the Keygate state store.
//!
//! Lets several Keygate workers share challenges, codes, refresh tokens and
//! rate-limit counters. Compare-and-swap and windowed counters run as Lua
//! scripts so each stays a single atomic step on the server.
//!
//! Requires Redis 6.0 or newer (`SET ... KEEPTTL`).

mod config;
mod error;
mod store;

pub use config::RedisStoreConfig;
pub use error::RedisStoreError;
pub use store::RedisStateStore;
