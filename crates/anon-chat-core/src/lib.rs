//! Core abstractions for the anonymous chat client.
//!
//! This crate provides the fundamental building blocks:
//! - `ChatMessage` - Immutable chat message with a dedup key
//! - `AnonymousIdentity` - Stable `User-xxxxxxxx` pseudonym
//! - `MessageLog` - Ordered, deduplicated transcript
//! - `ChatConfig` - Client configuration
//! - Identity storage trait

pub mod config;
pub mod identity;
pub mod message;
pub mod msg_log;
pub mod traits;

pub use config::{ChatConfig, ConfigError, ReconnectConfig};
pub use identity::{AnonymousIdentity, IdentityGenerator, RandomIdentityGenerator};
pub use message::{ChatMessage, DedupKey, SYSTEM_SENDER};
pub use msg_log::MessageLog;
pub use traits::{IdentityError, IdentityStorage};
