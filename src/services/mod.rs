//! Services
//!
//! Business logic behind the HTTP and WebSocket handlers.

pub mod audio;
pub mod auth;
pub mod edit;
pub mod moderation;
pub mod relay;
pub mod search;

pub use audio::{AsrConnector, AsrSettings, AudioRelay, Duplex, Frame, TungsteniteAsrConnector};
pub use auth::{Identity, StaticTokenVerifier, TokenVerifier};
pub use edit::{resolve_edit, EditOutcome, NewIds, TurnScope};
pub use moderation::{KeywordFilter, SensitiveFilter, SensitiveHit};
pub use relay::{PipelineExecutor, PipelineSettings, PreparedRelay, RelayOutcome};
pub use search::{SearchOutcome, SearchProgress, SearchTool};
