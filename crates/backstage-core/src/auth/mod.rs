//! Authentication module for managing the signed-in session.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for tokens and the redirect origin
//! - `token`: JWT expiry inspection
//! - `SessionManager`: login, logout, refresh and profile operations
//! - `RouteGuard`: access decisions for protected views
//!
//! Access tokens last about an hour and are refreshed every 59 minutes.

pub mod credentials;
pub mod error;
pub mod guard;
pub mod manager;
pub mod session;
pub mod token;

pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore, StoreKey,
};
pub use error::AuthError;
pub use guard::{RouteDecision, RouteGuard};
pub use manager::{RefreshOutcome, SessionManager};
pub use session::{SessionSnapshot, SessionStatus};
