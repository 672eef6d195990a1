//! Storage Layer
//!
//! SQLite persistence for conversation messages and the TOML configuration
//! loader.

pub mod config;
pub mod database;
pub mod messages;

pub use config::ConfigService;
pub use database::{Database, DbPool};
pub use messages::{MessagePage, MessageStore, SqliteMessageStore};
