//! Keygate server: configuration loading, logging and the HTTP listener
//! around the `keygate-auth` engine.

pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, StorageBackend};
pub use server::{KeygateServer, ServerBuilder, build_app, build_app_with_engine, open_store};
