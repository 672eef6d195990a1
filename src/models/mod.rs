//! Data Models
//!
//! Persisted messages, request bodies, wire events and configuration.

pub mod chat;
pub mod event;
pub mod message;
pub mod response;
pub mod settings;

pub use chat::*;
pub use event::*;
pub use message::*;
pub use response::*;
pub use settings::*;
