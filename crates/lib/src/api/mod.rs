//! Backend REST API: wire types, the `Backend` seam and the reqwest client.
//!
//! Every failure, whether transport or non-success status, surfaces as an [`ApiError`];
//! callers decide what the user sees.

mod client;
mod types;

pub use client::{ApiClient, ApiError, Backend};
pub use types::{
    ChatResponse, ConversationDetail, ConversationSummary, CreatedConversation, Message,
    ModelInfo, Role, Settings, SettingsUpdate,
};
