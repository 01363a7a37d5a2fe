//! REST API client module for the studio backend.
//!
//! This module provides the `ApiClient`, the authenticated request pipeline
//! every call goes through. The backend issues short-lived JWT access tokens
//! and longer-lived refresh tokens from `/api/auth/token/`.

pub mod client;
pub mod error;
pub mod request;

pub use client::{ApiClient, SessionEvent, LOGIN_PATH};
pub use error::{ApiError, RefreshError};
pub use request::{ApiRequest, RequestBody, RetryState};
