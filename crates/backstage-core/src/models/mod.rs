//! Data models for the studio API.
//!
//! - `User`: the profile returned by `/api/auth/profile/`
//! - `ProfileUpdate`: partial profile edits
//! - `Registration`, `PasswordChange`, `ProfileImage`: request payloads
//! - `TokenPair`, `AccessToken`: token endpoint responses

pub mod auth;
pub mod user;

pub use auth::{AccessToken, Credentials, PasswordChange, RefreshRequest, Registration, TokenPair};
pub use user::{AcknowledgeLevel, ProfileImage, ProfileUpdate, Role, User};
