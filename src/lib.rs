//! Chat Relay
//!
//! Streaming chat completion server. It includes:
//! - the completion pipeline (edit resolution, model dispatch, SSE events,
//!   persistence)
//! - the speech recognition relay
//! - HTTP and WebSocket handlers (axum)
//! - Storage layer (SQLite, TOML config)
//! - Data models and utilities

pub mod api;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use api::create_router;
pub use models::settings::AppConfig;
pub use state::AppState;
pub use utils::error::{AppError, AppResult};
