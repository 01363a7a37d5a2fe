use serde::Serialize;

use crate::models::User;

/// Redirect origin used when none has been stored
pub const DEFAULT_REDIRECT_ORIGIN: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionStatus {
    #[default]
    Unauthenticated,
    /// Login or startup rehydration in flight
    Authenticating,
    Authenticated,
    /// Refresh in flight; still counts as signed in
    Refreshing,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Unauthenticated => write!(f, "signed out"),
            SessionStatus::Authenticating => write!(f, "signing in"),
            SessionStatus::Authenticated => write!(f, "signed in"),
            SessionStatus::Refreshing => write!(f, "refreshing"),
        }
    }
}

/// The session state UI collaborators observe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<User>,
    pub redirect_origin: String,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Unauthenticated,
            user: None,
            redirect_origin: DEFAULT_REDIRECT_ORIGIN.to_string(),
        }
    }
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Authenticated | SessionStatus::Refreshing
        ) && self.user.is_some()
    }

    /// Fresh signed-out state that keeps the redirect origin
    pub(crate) fn signed_out(redirect_origin: String) -> Self {
        Self {
            redirect_origin,
            ..Self::default()
        }
    }
}
