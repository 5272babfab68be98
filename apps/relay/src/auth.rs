//! Shared-secret authentication
//!
//! Workers present the secret in the AUTH frame; HTTP callers present it as a
//! Bearer token. Both go through a [`TokenVerifier`] so the tunnel core can be
//! exercised with any verifier in tests.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use tracing::debug;

/// Decides whether a presented token is acceptable
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> bool;
}

/// Verifier comparing against a single configured secret in constant time
#[derive(Clone)]
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenVerifier for SharedSecretVerifier {
    fn verify(&self, token: &str) -> bool {
        // An empty configured secret must never authenticate anyone
        if self.secret.is_empty() {
            return false;
        }
        self.secret.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

impl<F> TokenVerifier for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn verify(&self, token: &str) -> bool {
        self(token)
    }
}

/// Extract the API key from an `Authorization: Bearer <key>` header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();

    if token.is_empty() {
        debug!("Empty bearer token");
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_verifier() {
        let verifier = SharedSecretVerifier::new("test-token-12345");
        assert!(verifier.verify("test-token-12345"));
        assert!(!verifier.verify("wrong-token"));
        assert!(!verifier.verify("test-token-1234"));
        assert!(!verifier.verify(""));
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        let verifier = SharedSecretVerifier::new("");
        assert!(!verifier.verify(""));
        assert!(!verifier.verify("anything"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let verifier = SharedSecretVerifier::new("super-secret");
        assert!(!format!("{:?}", verifier).contains("super-secret"));
    }

    #[test]
    fn test_closure_verifier() {
        let verifier = |token: &str| token.starts_with("ok-");
        assert!(verifier.verify("ok-1"));
        assert!(!TokenVerifier::verify(&verifier, "no"));
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_none());

        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer(&headers), Some("abc123"));

        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(extract_bearer(&headers).is_none());
    }
}
