use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced to UI collaborators.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    Authentication(#[source] ApiError),

    #[error("Registration failed: {message}")]
    Registration {
        message: String,
        /// Field-level validation messages reported by the server
        detail: Option<serde_json::Value>,
    },

    #[error("Profile update failed: {0}")]
    ProfileUpdate(#[source] ApiError),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Credential storage failed: {0:#}")]
    Storage(anyhow::Error),
}

impl AuthError {
    pub(crate) fn registration(err: ApiError) -> Self {
        match err {
            ApiError::Validation(detail) => AuthError::Registration {
                message: "the server rejected the submitted details".to_string(),
                detail: Some(detail),
            },
            other => AuthError::Registration {
                message: other.to_string(),
                detail: None,
            },
        }
    }

    /// Short message suitable for showing next to a form
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Authentication(ApiError::Unauthorized)
            | AuthError::Authentication(ApiError::Validation(_)) => {
                "Invalid username or password".to_string()
            }
            AuthError::Authentication(ApiError::NetworkError(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            AuthError::Authentication(ApiError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::ProfileUpdate(ApiError::SessionExpired(_)) => {
                "Your session has expired. Please log in again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RefreshError;

    #[test]
    fn test_registration_keeps_validation_detail() {
        let detail = serde_json::json!({ "email": ["Enter a valid email address."] });
        match AuthError::registration(ApiError::Validation(detail.clone())) {
            AuthError::Registration { detail: Some(d), .. } => assert_eq!(d, detail),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_registration_generic_failure() {
        match AuthError::registration(ApiError::ServerError("boom".to_string())) {
            AuthError::Registration { message, detail } => {
                assert!(message.contains("boom"));
                assert!(detail.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            AuthError::Authentication(ApiError::Unauthorized).user_message(),
            "Invalid username or password"
        );
        assert_eq!(
            AuthError::ProfileUpdate(ApiError::SessionExpired(RefreshError::MissingToken))
                .user_message(),
            "Your session has expired. Please log in again."
        );
        assert_eq!(AuthError::NotAuthenticated.user_message(), "Not signed in");
    }
}
