//! Session lifecycle manager.
//!
//! `SessionManager` owns the session state and is the only thing that moves
//! it between states:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated <-> Refreshing
//!        ^                  |                |              |
//!        +------------------+----------------+--------------+  (failure / logout)
//! ```
//!
//! Startup rehydration runs inside `start` before it returns. A background
//! task refreshes the access token on a fixed interval and signs out when
//! the request pipeline reports an unrecoverable session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, SessionEvent};
use crate::models::{Credentials, PasswordChange, ProfileImage, ProfileUpdate, Registration, User};

use super::credentials::{CredentialStore, StoreKey};
use super::guard::{RouteDecision, RouteGuard};
use super::session::{SessionSnapshot, SessionStatus, DEFAULT_REDIRECT_ORIGIN};
use super::{token, AuthError};

/// What a call to `SessionManager::refresh` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No refresh token stored
    Skipped,
    Refreshed,
    /// A login or logout happened while in flight; result dropped
    Discarded,
    /// Refresh failed and the session was cleared
    SignedOut,
}

/// Handle to the session. Clone is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    state: watch::Sender<SessionSnapshot>,
    /// Bumped by login and logout so in-flight refreshes can tell they are stale
    epoch: AtomicU64,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = background.take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    /// Create the session, rehydrate it from stored tokens and arm the
    /// background refresh. Must be called inside a tokio runtime.
    pub async fn start(api: ApiClient, refresh_interval: Duration) -> Self {
        let store = Arc::clone(api.store());
        let redirect_origin = read_store(store.as_ref(), StoreKey::RedirectOrigin)
            .unwrap_or_else(|| DEFAULT_REDIRECT_ORIGIN.to_string());
        let (state, _) = watch::channel(SessionSnapshot::signed_out(redirect_origin));

        // Subscribe before rehydrating so no pipeline event is missed
        let events = api.subscribe();

        let manager = Self {
            inner: Arc::new(ManagerInner {
                api,
                store,
                state,
                epoch: AtomicU64::new(0),
                background: Mutex::new(None),
            }),
        };

        manager.rehydrate().await;
        manager.arm_background(events, refresh_interval);
        manager
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Watch session changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Pipeline events, including where to send the user after expiry
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.api.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.borrow().status
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    /// Signed in with a stored access token and a fetched profile
    pub fn is_authenticated(&self) -> bool {
        self.inner.read(StoreKey::AccessToken).is_some()
            && self.inner.state.borrow().is_authenticated()
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Decide whether `path` may be shown in the current session
    pub fn guard(&self, path: &str) -> RouteDecision {
        RouteGuard::check(path, self.is_authenticated())
    }

    // =========================================================================
    // Redirect origin
    // =========================================================================

    pub fn redirect_origin(&self) -> String {
        self.inner.state.borrow().redirect_origin.clone()
    }

    /// Remember where to return after login. Persists immediately.
    pub fn set_redirect_origin(&self, origin: &str) {
        if let Err(e) = self.inner.store.set(StoreKey::RedirectOrigin, origin) {
            warn!(error = %e, "Failed to persist redirect origin");
        }
        self.inner
            .state
            .send_modify(|s| s.redirect_origin = origin.to_string());
    }

    /// Return the redirect origin and reset it to the default
    pub fn take_redirect_origin(&self) -> String {
        let origin = self.redirect_origin();
        if let Err(e) = self.inner.store.remove(StoreKey::RedirectOrigin) {
            warn!(error = %e, "Failed to clear redirect origin");
        }
        self.inner
            .state
            .send_modify(|s| s.redirect_origin = DEFAULT_REDIRECT_ORIGIN.to_string());
        origin
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn rehydrate(&self) {
        let Some(access) = self.inner.read(StoreKey::AccessToken) else {
            debug!("No stored access token, starting signed out");
            return;
        };

        if token::is_expired(&access) {
            info!("Stored access token expired, starting signed out");
            self.clear_session();
            return;
        }

        let epoch = self.inner.current_epoch();
        self.inner
            .state
            .send_modify(|s| s.status = SessionStatus::Authenticating);

        match self.inner.api.fetch_profile().await {
            Ok(user) if self.inner.is_current(epoch) => {
                info!(username = %user.username, "Session restored");
                self.commit_user(user);
            }
            Ok(_) => debug!("Session changed during rehydration, discarding profile"),
            Err(e) => {
                warn!(error = %e, "Failed to restore session");
                if self.inner.is_current(epoch) {
                    self.clear_session();
                }
            }
        }
    }

    /// Exchange credentials for tokens and load the profile.
    ///
    /// Stale tokens are dropped first. On failure no token is left behind.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let epoch = self.inner.bump_epoch();
        info!(username = username, "Logging in");

        if let Err(e) = self.inner.store.clear_tokens() {
            warn!(error = %e, "Failed to clear stale tokens");
        }
        self.inner.state.send_modify(|s| {
            s.status = SessionStatus::Authenticating;
            s.user = None;
        });

        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };

        match self.authenticate(&credentials).await {
            Ok(user) => {
                info!(username = %user.username, "Login successful");
                self.commit_user(user.clone());
                Ok(user)
            }
            Err(e) => {
                error!(error = %e, "Login failed");
                // A newer login owns the store now
                if self.inner.is_current(epoch) {
                    self.clear_session();
                }
                Err(e)
            }
        }
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthError> {
        let pair = self
            .inner
            .api
            .obtain_token_pair(credentials)
            .await
            .map_err(AuthError::Authentication)?;

        self.inner
            .store
            .set(StoreKey::AccessToken, &pair.access)
            .and_then(|_| self.inner.store.set(StoreKey::RefreshToken, &pair.refresh))
            .map_err(AuthError::Storage)?;

        self.inner
            .api
            .fetch_profile()
            .await
            .map_err(AuthError::Authentication)
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, registration: &Registration) -> Result<serde_json::Value, AuthError> {
        info!(username = %registration.username, "Registering account");
        self.inner
            .api
            .register(registration)
            .await
            .map_err(AuthError::registration)
    }

    /// Forget tokens, redirect origin and user. Never fails; safe to repeat.
    pub fn logout(&self) {
        self.inner.bump_epoch();
        for key in StoreKey::ALL {
            if let Err(e) = self.inner.store.remove(key) {
                warn!(key = %key, error = %e, "Failed to clear stored value");
            }
        }
        self.inner.state.send_replace(SessionSnapshot::default());
        info!("Logged out");
    }

    /// Trade the refresh token for a new access token and reload the profile.
    ///
    /// Failures are not returned: the session is signed out instead.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.inner.read(StoreKey::RefreshToken).is_none() {
            debug!("No refresh token stored, skipping refresh");
            return RefreshOutcome::Skipped;
        }

        let epoch = self.inner.current_epoch();
        self.inner.state.send_if_modified(|s| {
            if s.status == SessionStatus::Authenticated {
                s.status = SessionStatus::Refreshing;
                true
            } else {
                false
            }
        });

        let result = self.exchange_and_reload().await;

        if !self.inner.is_current(epoch) {
            debug!("Session changed during refresh, discarding result");
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(user) => {
                debug!("Access token refreshed");
                self.commit_user(user);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Token refresh failed, signing out");
                self.logout();
                RefreshOutcome::SignedOut
            }
        }
    }

    async fn exchange_and_reload(&self) -> anyhow::Result<User> {
        self.inner.api.refresh_access_token().await?;
        self.inner
            .api
            .fetch_profile()
            .await
            .context("Failed to reload profile after refresh")
    }

    // =========================================================================
    // Profile operations
    // =========================================================================

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, AuthError> {
        self.require_session()?;
        let epoch = self.inner.current_epoch();

        let user = self
            .inner
            .api
            .update_profile(update)
            .await
            .map_err(|e| self.profile_error(e))?;

        self.replace_user(epoch, user.clone());
        Ok(user)
    }

    pub async fn update_password(&self, old_password: &str, new_password: &str) -> Result<(), AuthError> {
        self.require_session()?;
        let change = PasswordChange {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.inner
            .api
            .change_password(&change)
            .await
            .map_err(|e| self.profile_error(e))
    }

    pub async fn update_profile_image(&self, image: ProfileImage) -> Result<User, AuthError> {
        self.require_session()?;
        let epoch = self.inner.current_epoch();

        let user = self
            .inner
            .api
            .upload_profile_image(image)
            .await
            .map_err(|e| self.profile_error(e))?;

        self.replace_user(epoch, user.clone());
        Ok(user)
    }

    pub async fn delete_profile_image(&self) -> Result<(), AuthError> {
        self.require_session()?;
        let epoch = self.inner.current_epoch();

        self.inner
            .api
            .delete_profile_image()
            .await
            .map_err(|e| self.profile_error(e))?;

        if self.inner.is_current(epoch) {
            self.inner.state.send_modify(|s| {
                if let Some(user) = s.user.as_mut() {
                    user.profile_image_url = None;
                }
            });
        }
        Ok(())
    }

    // =========================================================================
    // Background task
    // =========================================================================

    fn arm_background(&self, mut events: broadcast::Receiver<SessionEvent>, period: Duration) {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let manager = SessionManager { inner };
                        let live = manager.inner.state.borrow().is_authenticated();
                        if live {
                            let outcome = manager.refresh().await;
                            debug!(?outcome, "Scheduled refresh finished");
                        }
                    }
                    event = events.recv() => match event {
                        Ok(SessionEvent::Expired { redirect_to }) => {
                            let Some(inner) = weak.upgrade() else { break };
                            let manager = SessionManager { inner };
                            // A login may have stored new tokens since the event was sent
                            if manager.inner.read(StoreKey::AccessToken).is_none() {
                                info!(redirect_to = %redirect_to, "Session expired, signing out");
                                manager.logout();
                            }
                        }
                        Ok(SessionEvent::TokenRefreshed) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Missed session events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Background session task stopped");
        });

        *lock(&self.inner.background) = Some(handle);
    }

    /// Stop the background refresh. Dropping the last handle does the same.
    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.inner.background).take() {
            handle.abort();
            debug!("Background session task aborted");
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_session(&self) -> Result<(), AuthError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(AuthError::NotAuthenticated)
        }
    }

    fn profile_error(&self, err: ApiError) -> AuthError {
        if err.is_session_expired() {
            self.logout();
        }
        AuthError::ProfileUpdate(err)
    }

    fn commit_user(&self, user: User) {
        self.inner.state.send_modify(|s| {
            s.status = SessionStatus::Authenticated;
            s.user = Some(user);
        });
    }

    fn replace_user(&self, epoch: u64, user: User) {
        if self.inner.is_current(epoch) {
            self.inner.state.send_modify(|s| s.user = Some(user));
        } else {
            debug!("Session changed during profile update, not applying result");
        }
    }

    /// Drop tokens and user but keep the redirect origin
    fn clear_session(&self) {
        if let Err(e) = self.inner.store.clear_tokens() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        let origin = self.redirect_origin();
        self.inner
            .state
            .send_replace(SessionSnapshot::signed_out(origin));
    }
}

impl ManagerInner {
    fn read(&self, key: StoreKey) -> Option<String> {
        read_store(self.store.as_ref(), key)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }
}

fn read_store(store: &dyn CredentialStore, key: StoreKey) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read credential store");
            None
        }
    }
}
