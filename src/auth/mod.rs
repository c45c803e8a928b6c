//! Authentication resolution
//!
//! Resolves `headers -> User | None`. Local token verification runs first at
//! zero network cost; only when it fails (bad signature, malformed token, or
//! no token-bearing header/cookie at all) does the optional network session
//! lookup run. Every fallback failure collapses to "no user" - transport
//! errors never propagate out of `resolve`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{Headers, User};
use crate::error::ConfigError;
use crate::token;

pub const DEFAULT_SESSION_COOKIE: &str = "session_token";

/// Network lookup of the session user.
///
/// Implemented over HTTP by [`HttpSessionBackend`]; swap in a mock for tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Any non-success response, transport error or malformed body is `None`.
    async fn fetch_user(&self, headers: &Headers) -> Option<User>;
}

/// Session endpoint response body: `{"user": {...}}`.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    image: Option<String>,
}

impl SessionUser {
    fn into_user(self) -> Option<User> {
        let id = self.id.clone().or_else(|| self.email.clone())?;
        Some(User {
            id,
            name: self.name,
            email: self.email,
            image: self.image,
            claims: Default::default(),
        })
    }
}

/// HTTP-backed session lookup. Forwards the caller's `Cookie` and
/// `Authorization` headers so the endpoint can identify the session.
pub struct HttpSessionBackend {
    endpoint: String,
    http_client: Client,
}

impl HttpSessionBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            endpoint: endpoint.into(),
            http_client,
        }
    }
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn fetch_user(&self, headers: &Headers) -> Option<User> {
        let mut request = self.http_client.get(&self.endpoint);
        if let Some(cookie) = headers.get("cookie") {
            request = request.header("cookie", cookie);
        }
        if let Some(authorization) = headers.get("authorization") {
            request = request.header("authorization", authorization);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "session lookup failed");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "session lookup rejected");
            return None;
        }

        let body: SessionResponse = response.json().await.ok()?;
        body.user.and_then(SessionUser::into_user)
    }
}

/// Resolves the caller identity from request headers.
pub struct AuthProvider {
    secret: Option<Vec<u8>>,
    session_cookie: String,
    backend: Option<Arc<dyn SessionBackend>>,
}

impl std::fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("session_cookie", &self.session_cookie)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn SessionBackend>"))
            .finish()
    }
}

impl AuthProvider {
    pub fn builder() -> AuthProviderBuilder {
        AuthProviderBuilder::default()
    }

    /// Resolve a user, or `None`. Local verification wins when configured;
    /// the backend only runs after a local miss.
    pub async fn resolve(&self, headers: &Headers) -> Option<User> {
        if let Some(secret) = &self.secret {
            if let Some(raw) = extract_token(headers, &self.session_cookie) {
                if let Some(user) = token::verify(raw, secret).and_then(token::Claims::into_user) {
                    return Some(user);
                }
                tracing::debug!("local token verification failed");
            }
        }

        if let Some(backend) = &self.backend {
            return backend.fetch_user(headers).await;
        }
        None
    }
}

/// Extract the bearer token from `Authorization`, else the session cookie.
fn extract_token<'a>(headers: &'a Headers, cookie_name: &str) -> Option<&'a str> {
    if let Some(authorization) = headers.get("authorization") {
        if let Some(bearer) = authorization.strip_prefix("Bearer ") {
            if !bearer.is_empty() {
                return Some(bearer);
            }
        }
    }
    headers.cookie(cookie_name)
}

/// Builds an [`AuthProvider`]. A provider configured with neither a signing
/// secret nor a session backend is a setup error, raised here rather than at
/// call time.
#[derive(Default)]
pub struct AuthProviderBuilder {
    secret: Option<Vec<u8>>,
    session_cookie: Option<String>,
    backend: Option<Arc<dyn SessionBackend>>,
}

impl AuthProviderBuilder {
    /// Enable local verification with this HMAC secret.
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Cookie to read the token from when no bearer header is present.
    /// Defaults to `session_token`.
    pub fn session_cookie(mut self, name: impl Into<String>) -> Self {
        self.session_cookie = Some(name.into());
        self
    }

    /// Enable the network fallback against this session endpoint.
    pub fn session_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.backend(Arc::new(HttpSessionBackend::new(endpoint)))
    }

    /// Enable the network fallback with a custom backend.
    pub fn backend(mut self, backend: Arc<dyn SessionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<AuthProvider, ConfigError> {
        if self.secret.is_none() && self.backend.is_none() {
            return Err(ConfigError::MissingAuthMode);
        }
        Ok(AuthProvider {
            secret: self.secret,
            session_cookie: self
                .session_cookie
                .unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string()),
            backend: self.backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use hmac::{Hmac, Mac};
    use serde_json::json;
    use sha2::Sha256;

    const SECRET: &[u8] = b"resolver-test-secret";

    fn sign(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).unwrap());
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET).unwrap();
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{header}.{payload}.{signature}")
    }

    #[test]
    fn test_builder_requires_at_least_one_mode() {
        let err = AuthProvider::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingAuthMode);
    }

    #[test]
    fn test_resolve_bearer_token_locally() {
        let provider = AuthProvider::builder().secret(SECRET).build().unwrap();
        let token = sign(&json!({"sub": "user-1", "email": "a@b.c"}));
        let headers: Headers = [("authorization", format!("Bearer {token}"))]
            .into_iter()
            .collect();

        let user = tokio_test::block_on(provider.resolve(&headers)).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn test_resolve_session_cookie_locally() {
        let provider = AuthProvider::builder().secret(SECRET).build().unwrap();
        let token = sign(&json!({"sub": "user-2"}));
        let headers: Headers = [("cookie", format!("a=1; session_token={token}"))]
            .into_iter()
            .collect();

        let user = tokio_test::block_on(provider.resolve(&headers)).unwrap();
        assert_eq!(user.id, "user-2");
    }

    #[test]
    fn test_custom_session_cookie_name() {
        let provider = AuthProvider::builder()
            .secret(SECRET)
            .session_cookie("sid")
            .build()
            .unwrap();
        let token = sign(&json!({"sub": "user-3"}));
        let headers: Headers = [("cookie", format!("sid={token}"))].into_iter().collect();

        let user = tokio_test::block_on(provider.resolve(&headers)).unwrap();
        assert_eq!(user.id, "user-3");
    }

    #[test]
    fn test_no_token_and_no_backend_resolves_none() {
        let provider = AuthProvider::builder().secret(SECRET).build().unwrap();
        assert!(tokio_test::block_on(provider.resolve(&Headers::new())).is_none());
    }

    #[test]
    fn test_bad_signature_resolves_none_without_backend() {
        let provider = AuthProvider::builder().secret(b"other".to_vec()).build().unwrap();
        let token = sign(&json!({"sub": "user-1"}));
        let headers: Headers = [("authorization", format!("Bearer {token}"))]
            .into_iter()
            .collect();
        assert!(tokio_test::block_on(provider.resolve(&headers)).is_none());
    }

    #[tokio::test]
    async fn test_local_hit_skips_backend() {
        let mut backend = MockSessionBackend::new();
        backend.expect_fetch_user().times(0);

        let provider = AuthProvider::builder()
            .secret(SECRET)
            .backend(Arc::new(backend))
            .build()
            .unwrap();
        let token = sign(&json!({"sub": "user-1"}));
        let headers: Headers = [("authorization", format!("Bearer {token}"))]
            .into_iter()
            .collect();

        assert!(provider.resolve(&headers).await.is_some());
    }

    #[tokio::test]
    async fn test_local_miss_falls_back_to_backend() {
        let mut backend = MockSessionBackend::new();
        backend
            .expect_fetch_user()
            .times(1)
            .returning(|_| Some(User::new("session-user")));

        let provider = AuthProvider::builder()
            .secret(SECRET)
            .backend(Arc::new(backend))
            .build()
            .unwrap();
        let headers: Headers = [("authorization", "Bearer garbage")].into_iter().collect();

        let user = provider.resolve(&headers).await.unwrap();
        assert_eq!(user.id, "session-user");
    }

    #[tokio::test]
    async fn test_backend_only_provider() {
        let mut backend = MockSessionBackend::new();
        backend
            .expect_fetch_user()
            .times(1)
            .returning(|_| Some(User::new("u")));

        let provider = AuthProvider::builder()
            .backend(Arc::new(backend))
            .build()
            .unwrap();
        assert!(provider.resolve(&Headers::new()).await.is_some());
    }

    #[test]
    fn test_extract_token_prefers_bearer_over_cookie() {
        let headers: Headers = [
            ("authorization", "Bearer from-header"),
            ("cookie", "session_token=from-cookie"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            extract_token(&headers, DEFAULT_SESSION_COOKIE),
            Some("from-header")
        );
    }

    #[test]
    fn test_extract_token_rejects_non_bearer_scheme() {
        let headers: Headers = [("authorization", "Basic dXNlcg==")].into_iter().collect();
        assert_eq!(extract_token(&headers, DEFAULT_SESSION_COOKIE), None);
    }

    #[test]
    fn test_session_user_requires_identity() {
        let user = SessionUser {
            id: None,
            name: Some("No Id".into()),
            email: None,
            image: None,
        };
        assert!(user.into_user().is_none());
    }
}
