use reqwest::Method;
use serde::Serialize;

use crate::models::ProfileImage;

/// Whether a request has already been replayed after a token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    #[default]
    Fresh,
    Retried,
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(ProfileImage),
}

/// An outbound call to the studio API, replayable after a refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    pub retry: RetryState,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            retry: RetryState::Fresh,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> serde_json::Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn multipart(mut self, image: ProfileImage) -> Self {
        self.body = RequestBody::Multipart(image);
        self
    }

    pub fn can_retry(&self) -> bool {
        self.retry == RetryState::Fresh
    }

    pub fn mark_retried(&mut self) {
        self.retry = RetryState::Retried;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_state_transitions_once() {
        let mut req = ApiRequest::get("/api/auth/profile/");
        assert!(req.can_retry());
        req.mark_retried();
        assert!(!req.can_retry());
        // A clone carries its retry state along
        assert!(!req.clone().can_retry());
    }

    #[test]
    fn test_json_body() {
        let req = ApiRequest::put("/api/auth/profile/")
            .json(&serde_json::json!({ "phone_number": "555-0100" }))
            .unwrap();
        assert_eq!(req.method, Method::PUT);
        match req.body {
            RequestBody::Json(v) => assert_eq!(v["phone_number"], "555-0100"),
            other => panic!("unexpected body: {:?}", other),
        }
    }
}
