//! Local verification of compact HS256 tokens
//!
//! Verifies three-segment base64url tokens (header, payload, signature)
//! without any network round-trip. Only HMAC-SHA256 is accepted; every other
//! algorithm, including `none`, is rejected to prevent algorithm-substitution
//! attacks.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;

use crate::context::User;

type HmacSha256 = Hmac<Sha256>;

/// Claims extracted from a verified token payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Claims {
    pub sub: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    /// Expiration, seconds since the Unix epoch; fractional values permitted
    pub exp: Option<f64>,
    /// Not-before, seconds since the Unix epoch; fractional values permitted
    pub nbf: Option<f64>,
    /// Everything else in the payload, carried over unchanged
    pub extra: HashMap<String, Value>,
}

impl Claims {
    /// Map claims into a user record. `sub` is the identity; `email` is the
    /// fallback. A token carrying neither does not produce a user.
    pub fn into_user(self) -> Option<User> {
        let id = self.sub.clone().or_else(|| self.email.clone())?;
        Some(User {
            id,
            name: self.name,
            email: self.email,
            image: self.image,
            claims: self.extra,
        })
    }
}

/// Verify a compact token against `secret`.
///
/// Never panics and never errors: any structural or cryptographic failure
/// (wrong segment count, unsupported algorithm, bad signature, malformed
/// payload, expired or not-yet-valid token) yields `None`. The caller learns
/// nothing about which check failed.
pub fn verify(token: &str, secret: &[u8]) -> Option<Claims> {
    verify_at(token, secret, chrono::Utc::now().timestamp())
}

fn verify_at(token: &str, secret: &[u8], now_secs: i64) -> Option<Claims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(segments[0]).ok()?;
    let header: Value = serde_json::from_slice(&header_bytes).ok()?;
    if header.get("alg").and_then(Value::as_str) != Some("HS256") {
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(segments[0].as_bytes());
    mac.update(b".");
    mac.update(segments[1].as_bytes());
    let expected = mac.finalize().into_bytes();

    let provided = URL_SAFE_NO_PAD.decode(segments[2]).ok()?;
    if !constant_time_eq(&expected, &provided) {
        return None;
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(segments[1]).ok()?;
    let payload: serde_json::Map<String, Value> = serde_json::from_slice(&payload_bytes).ok()?;

    let claims = extract_claims(payload);

    if let Some(exp) = claims.exp {
        if now_secs as f64 >= exp {
            return None;
        }
    }
    if let Some(nbf) = claims.nbf {
        if (now_secs as f64) < nbf {
            return None;
        }
    }

    Some(claims)
}

/// Pull recognized claims out of the payload; everything else lands in
/// `extra`. A non-numeric `exp`/`nbf` is treated as unrecognized.
fn extract_claims(payload: serde_json::Map<String, Value>) -> Claims {
    let mut claims = Claims::default();
    for (key, value) in payload {
        match key.as_str() {
            "sub" if value.is_string() => claims.sub = value.as_str().map(String::from),
            "name" if value.is_string() => claims.name = value.as_str().map(String::from),
            "email" if value.is_string() => claims.email = value.as_str().map(String::from),
            // OIDC uses "picture"; some providers use "image"
            "picture" | "image" if value.is_string() => {
                claims.image = value.as_str().map(String::from)
            }
            "exp" if value.is_number() => claims.exp = value.as_f64(),
            "nbf" if value.is_number() => claims.nbf = value.as_f64(),
            _ => {
                claims.extra.insert(key, value);
            }
        }
    }
    claims
}

/// Constant-time byte comparison
///
/// Length is checked first; beyond that, running time does not depend on
/// where the first differing byte occurs.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
