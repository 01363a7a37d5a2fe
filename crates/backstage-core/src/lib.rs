//! Backstage core - session and authentication for the Backstage studio site.
//!
//! This crate provides:
//! - `auth`: credential storage, token inspection, the session lifecycle
//!   manager and the route guard
//! - `api`: the authenticated request pipeline for the studio REST API
//! - `models`: user profile and request/response payloads
//! - `config`: client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, RefreshError, SessionEvent};
pub use auth::{
    AuthError, CredentialStore, RefreshOutcome, RouteDecision, SessionManager, SessionSnapshot,
    SessionStatus, StoreKey,
};
pub use config::Config;
pub use models::User;
