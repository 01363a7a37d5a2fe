//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use backstage_core::auth::{CredentialStore, MemoryCredentialStore, StoreKey};
use backstage_core::ApiClient;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use serde_json::{json, Value};

pub const PROFILE_PATH: &str = "/api/auth/profile/";
pub const TOKEN_PATH: &str = "/api/auth/token/";
pub const REFRESH_PATH: &str = "/api/auth/token/refresh/";
pub const REGISTER_PATH: &str = "/api/auth/register/";
pub const IMAGE_PATH: &str = "/api/auth/user/profile/";
pub const PASSWORD_PATH: &str = "/api/auth/change-password/";

/// Unsigned JWT expiring `secs_from_now` seconds from now.
/// `label` keeps otherwise identical tokens distinct.
pub fn jwt(label: &str, secs_from_now: i64) -> String {
    let exp = Utc::now().timestamp() + secs_from_now;
    jwt_with_exp(label, exp)
}

pub fn jwt_with_exp(label: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "jti": label }).to_string());
    format!("{}.{}.signature", header, payload)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub fn user_json() -> Value {
    json!({
        "id": 42,
        "username": "lucia",
        "first_name": "Lucia",
        "last_name": "Ferrer",
        "email": "lucia@example.com",
        "phone_number": "555-0199",
        "acknowledge_level": "Intermediate",
        "role": "Student",
        "instrument": "Cello",
        "interests": "Baroque",
        "address": "12 Harbour St",
        "profile_image_url": "https://cdn.example.com/lucia.png"
    })
}

pub fn user_json_with(field: &str, value: Value) -> Value {
    let mut user = user_json();
    user[field] = value;
    user
}

pub fn memory_store() -> Arc<dyn CredentialStore> {
    Arc::new(MemoryCredentialStore::new())
}

pub fn store_with_tokens(access: &str, refresh: &str) -> Arc<dyn CredentialStore> {
    let store = memory_store();
    store.set(StoreKey::AccessToken, access).unwrap();
    store.set(StoreKey::RefreshToken, refresh).unwrap();
    store
}

pub fn api(base_url: &str, store: Arc<dyn CredentialStore>) -> ApiClient {
    ApiClient::with_timeout(base_url, store, Duration::from_secs(2)).unwrap()
}

pub fn stored(store: &Arc<dyn CredentialStore>, key: StoreKey) -> Option<String> {
    store.get(key).unwrap()
}

/// Long enough that the background refresh never fires during a test
pub const QUIET_INTERVAL: Duration = Duration::from_secs(3600);
