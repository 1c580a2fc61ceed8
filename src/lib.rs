#![doc = include_str!("../README.md")]

pub mod broker;
pub mod config;
mod cookies;
pub mod error;
pub mod http;
pub mod pkce;
pub mod provider;
pub mod session;
pub mod state;
pub mod store;
pub mod vault;

// Re-exports for convenient access
pub use broker::{SessionBroker, SessionStatus};
pub use config::Settings;
pub use error::Error;
pub use http::router;
pub use provider::{ProviderClient, ProviderConfig, TokenGrant};
pub use session::{SessionId, SessionRecord};
pub use state::AppState;
pub use store::{MemoryStore, RedisStore, SessionStore};
pub use vault::TokenVault;
