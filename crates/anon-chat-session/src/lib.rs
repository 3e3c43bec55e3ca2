//! Chat orchestration and identity storage for the anonymous chat client.
//!
//! Provides:
//! - `ChatController` - The one entry point for presentation code
//! - `IdentityStore` - Stable anonymous identity with degraded fallback
//! - Storage implementations (memory, file)

pub mod controller;
pub mod identity;
pub mod state;
pub mod storage;

pub use controller::{ChatController, ChatError};
pub use identity::{IDENTITY_KEY, IdentityStore};
pub use state::{ChatState, ChatStatus, LinkStatus};
