//! Chat Relay Core
//!
//! Foundational types shared by every crate in the chat-relay workspace.
//! This crate has no dependency on HTTP clients, storage or the web framework.
//!
//! ## Module Organization
//!
//! - `error` - Relay error taxonomy (`RelayError`, `RelayResult`)
//! - `streaming` - Canonical deltas, unified stream events and the adapter trait
//! - `pipe` - Bounded single-producer queue with explicit close semantics
//! - `proxy` - Proxy configuration data shared by outbound HTTP clients

pub mod error;
pub mod pipe;
pub mod proxy;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{RelayError, RelayResult};

// ── Pipe ───────────────────────────────────────────────────────────────
pub use pipe::{pipe, PipeClosed, PipeReceiver, PipeSender};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{
    AdapterError, CanonicalDelta, Citation, ContentType, StreamAdapter, UnifiedStreamEvent,
};
