//! Double-submit-cookie CSRF validation and token issuance
//!
//! A token is issued as a cookie and must be echoed back in a request header.
//! A cross-origin attacker cannot read the cookie to replicate it in the
//! header, so equality of the two channels proves same-origin intent. Both
//! values are already-opaque random tokens compared for equality, not
//! verified signatures, so no timing-safe comparison is required here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Headers;

pub const DEFAULT_COOKIE_NAME: &str = "csrf_token";
pub const DEFAULT_HEADER_NAME: &str = "x-csrf-token";

/// Cookie/header channel names. Purely configuration, no state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            header_name: DEFAULT_HEADER_NAME.to_string(),
        }
    }
}

/// CSRF validation failures. Messages name the missing channel but never
/// echo token values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("missing CSRF token in {0} header")]
    MissingHeader(String),

    #[error("missing CSRF token in {0} cookie")]
    MissingCookie(String),

    #[error("CSRF token mismatch")]
    Mismatch,
}

/// Validate the double-submit pair carried in the request headers.
///
/// The header token is trimmed; empty after trim counts as absent. The cookie
/// token comes from scanning the `Cookie` header for the configured name.
pub fn validate(headers: &Headers, config: &CsrfConfig) -> Result<(), CsrfError> {
    let header_token = headers
        .get(&config.header_name)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| CsrfError::MissingHeader(config.header_name.clone()))?;

    let cookie_token = headers
        .cookie(&config.cookie_name)
        .ok_or_else(|| CsrfError::MissingCookie(config.cookie_name.clone()))?;

    if header_token != cookie_token {
        tracing::debug!(
            header = %config.header_name,
            cookie = %config.cookie_name,
            "CSRF token mismatch"
        );
        return Err(CsrfError::Mismatch);
    }
    Ok(())
}

/// Generate a fresh opaque token: 32 random bytes, base64url.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Attributes for the issued cookie. `SameSite=Strict` is not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfCookieOptions {
    pub path: String,
    pub max_age_secs: u64,
    pub secure: bool,
}

impl Default for CsrfCookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age_secs: 3_600,
            secure: true,
        }
    }
}

/// Build a `Set-Cookie` header value issuing `token`.
pub fn build_set_cookie(token: &str, config: &CsrfConfig, opts: &CsrfCookieOptions) -> String {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; SameSite=Strict",
        config.cookie_name, token, opts.path, opts.max_age_secs
    );
    if opts.secure {
        cookie.push_str("; Secure");
    }
    cookie
}
