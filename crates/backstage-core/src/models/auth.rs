// Payloads for the token, registration and password endpoints.
// Debug impls redact secrets so they can be traced safely.

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Response of `POST /api/auth/token/`
#[derive(Clone, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair { .. }")
    }
}

#[derive(Clone, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Response of `POST /api/auth/token/refresh/`
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access: String,
}

/// New-account request for `POST /api/auth/register/`
#[derive(Clone, Default, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub phone_number: String,
    pub address: String,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials {
            username: "lucia".to_string(),
            password: "hunter2".to_string(),
        };
        let shown = format!("{:?}", creds);
        assert!(shown.contains("lucia"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn test_registration_wire_names() {
        let reg = Registration {
            email: "a@b.c".to_string(),
            first_name: "Ana".to_string(),
            phone_number: "555".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&reg).unwrap();
        assert_eq!(value["first_name"], "Ana");
        assert_eq!(value["phone_number"], "555");
        assert_eq!(value["address"], "");
    }
}
