//! API client for the studio REST API.
//!
//! `ApiClient` is the single path for outbound calls. It attaches the stored
//! access token to every request and, when a request comes back 401, trades
//! the refresh token for a new access token and replays the request once.
//! Concurrent refreshes collapse into one shared exchange.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{header, multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::auth::{CredentialStore, StoreKey};
use crate::config::{Config, DEFAULT_TIMEOUT_SECS};
use crate::models::user::PROFILE_IMAGE_FIELD;
use crate::models::{
    AccessToken, Credentials, PasswordChange, ProfileImage, ProfileUpdate, RefreshRequest,
    Registration, TokenPair, User,
};

use super::request::{ApiRequest, RequestBody};
use super::{ApiError, RefreshError};

// ============================================================================
// Constants
// ============================================================================

/// Where clients are sent when the session cannot be recovered
pub const LOGIN_PATH: &str = "/login";

const TOKEN_PATH: &str = "/api/auth/token/";
const TOKEN_REFRESH_PATH: &str = "/api/auth/token/refresh/";
const REGISTER_PATH: &str = "/api/auth/register/";
const PROFILE_PATH: &str = "/api/auth/profile/";
const PROFILE_IMAGE_PATH: &str = "/api/auth/user/profile/";
const CHANGE_PASSWORD_PATH: &str = "/api/auth/change-password/";

/// Pipeline events are rare; a small buffer is plenty
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Session-level events raised by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh exchange stored a new access token
    TokenRefreshed,
    /// Refresh failed; stored tokens were cleared
    Expired { redirect_to: String },
}

type RefreshResult = Result<String, RefreshError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// API client for the studio backend.
/// Clone is cheap - all clones share the connection pool, the credential
/// store and the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
    pending_refresh: Mutex<Option<PendingRefresh>>,
    events: broadcast::Sender<SessionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ApiClient {
    /// Create a new API client with the default timeout
    pub fn new(base_url: &str, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, store, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: &str,
        store: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                store,
                pending_refresh: Mutex::new(None),
                events,
            }),
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::with_timeout(&config.api_base_url(), store, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    /// Receive pipeline events (refreshes, expired sessions)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ===== Pipeline =====

    /// Send a request with the stored access token.
    ///
    /// A 401 triggers at most one refresh and one replay per request. If the
    /// refresh fails, the stored tokens are cleared, `SessionEvent::Expired`
    /// is broadcast and `ApiError::SessionExpired` is returned. A refresh
    /// overtaken by a login or logout leaves the store alone: the request is
    /// replayed with the newer session's token, or fails if there is none.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<Response, ApiError> {
        let mut token = self.inner.stored(StoreKey::AccessToken);

        loop {
            let response = self.send_once(&request, token.as_deref()).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Self::check_response(response).await;
            }

            if !request.can_retry() || self.inner.stored(StoreKey::RefreshToken).is_none() {
                debug!(path = %request.path, retry = ?request.retry, "Unauthorized, not retrying");
                return Self::check_response(response).await;
            }

            request.mark_retried();
            match self.refresh_after_unauthorized(token.as_deref()).await {
                Ok(fresh) => {
                    debug!(path = %request.path, "Replaying request with refreshed token");
                    token = Some(fresh);
                }
                Err(RefreshError::Superseded) => {
                    // A login or logout replaced the tokens; the store belongs to it now
                    match self.inner.stored(StoreKey::AccessToken) {
                        Some(current) if token.as_deref() != Some(current.as_str()) => {
                            debug!(path = %request.path, "Session replaced during refresh, replaying with its token");
                            token = Some(current);
                        }
                        _ => return Err(ApiError::SessionExpired(RefreshError::Superseded)),
                    }
                }
                Err(e) => {
                    self.expire_session(&e);
                    return Err(ApiError::SessionExpired(e));
                }
            }
        }
    }

    async fn send_once(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let url = self.inner.url(&request.path);
        debug!(method = %request.method, url = %url, authenticated = token.is_some(), "Sending request");

        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), &url)
            .header(header::ACCEPT, "application/json");

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(image) => {
                let part = multipart::Part::bytes(image.bytes.clone())
                    .file_name(image.file_name.clone())
                    .mime_str(&image.mime_type)?;
                builder.multipart(multipart::Form::new().part(PROFILE_IMAGE_FIELD, part))
            }
        };

        Ok(builder.send().await?)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    /// Get a usable access token after `stale` was rejected.
    /// Reuses a token another caller already obtained before starting an exchange.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> RefreshResult {
        if let Some(current) = self.inner.stored(StoreKey::AccessToken) {
            if stale != Some(current.as_str()) {
                debug!("Access token already replaced, reusing it");
                return Ok(current);
            }
        }
        self.refresh_access_token().await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Callers arriving while an exchange is in flight wait for that one
    /// instead of spending the refresh token again.
    pub async fn refresh_access_token(&self) -> RefreshResult {
        let pending = {
            let mut slot = lock(&self.inner.pending_refresh);
            match slot.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let pending = async move {
                        let result = inner.exchange_refresh_token().await;
                        lock(&inner.pending_refresh).take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn expire_session(&self, reason: &RefreshError) {
        warn!(error = %reason, "Token refresh failed, clearing stored tokens");
        if let Err(e) = self.inner.store.clear_tokens() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        let _ = self.inner.events.send(SessionEvent::Expired {
            redirect_to: LOGIN_PATH.to_string(),
        });
    }

    // ===== Endpoints =====

    /// Exchange username and password for an access/refresh pair
    pub async fn obtain_token_pair(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        let response = self
            .inner
            .client
            .post(self.inner.url(TOKEN_PATH))
            .json(credentials)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, "token response").await
    }

    /// Create a new account. Returns the server's representation of it.
    pub async fn register(&self, registration: &Registration) -> Result<serde_json::Value, ApiError> {
        let response = self
            .inner
            .client
            .post(self.inner.url(REGISTER_PATH))
            .json(registration)
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse registration response: {}", e)))
    }

    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        let response = self.execute(ApiRequest::get(PROFILE_PATH)).await?;
        Self::parse_json(response, "profile").await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        let request = ApiRequest::put(PROFILE_PATH).json(update)?;
        let response = self.execute(request).await?;
        Self::parse_json(response, "updated profile").await
    }

    pub async fn upload_profile_image(&self, image: ProfileImage) -> Result<User, ApiError> {
        let request = ApiRequest::put(PROFILE_IMAGE_PATH).multipart(image);
        let response = self.execute(request).await?;
        Self::parse_json(response, "updated profile").await
    }

    pub async fn delete_profile_image(&self) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(PROFILE_IMAGE_PATH)).await?;
        Ok(())
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<(), ApiError> {
        let request = ApiRequest::post(CHANGE_PASSWORD_PATH).json(change)?;
        self.execute(request).await?;
        Ok(())
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn stored(&self, key: StoreKey) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read credential store");
                None
            }
        }
    }

    async fn exchange_refresh_token(&self) -> RefreshResult {
        let refresh = self
            .stored(StoreKey::RefreshToken)
            .ok_or(RefreshError::MissingToken)?;

        debug!("Exchanging refresh token");
        let response = self
            .client
            .post(self.url(TOKEN_REFRESH_PATH))
            .json(&RefreshRequest {
                refresh: refresh.clone(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RefreshError::Rejected(response.status()));
        }

        let AccessToken { access } = response
            .json()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        // A logout or a new login while in flight wins over this result
        if self.stored(StoreKey::RefreshToken).as_deref() != Some(refresh.as_str()) {
            debug!("Refresh token changed during exchange, discarding result");
            return Err(RefreshError::Superseded);
        }

        if let Err(e) = self.store.set(StoreKey::AccessToken, &access) {
            warn!(error = %e, "Failed to persist refreshed access token");
        }
        let _ = self.events.send(SessionEvent::TokenRefreshed);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryCredentialStore;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let api = ApiClient::new("http://studio.test/", store).unwrap();
        assert_eq!(api.base_url(), "http://studio.test");
        assert_eq!(api.inner.url(PROFILE_PATH), "http://studio.test/api/auth/profile/");
    }

    #[test]
    fn test_clones_share_state() {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let api = ApiClient::new("http://studio.test", store).unwrap();
        let clone = api.clone();
        api.store().set(StoreKey::AccessToken, "shared").unwrap();
        assert_eq!(clone.inner.stored(StoreKey::AccessToken).as_deref(), Some("shared"));
        assert!(Arc::ptr_eq(&api.inner, &clone.inner));
    }
}
