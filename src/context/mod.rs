//! Per-invocation execution context and the transport header map.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Case-insensitive, read-only header map supplied by the caller's transport.
///
/// The pipeline does not bind to any specific transport; the caller provides
/// a `Headers` per invocation. An empty map degrades CSRF and auth checks to
/// their "absent" failure paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a cookie by name in the raw `Cookie` header.
    ///
    /// Entries are split on the first `=` only, so values containing `=`
    /// survive verbatim; both name and value are trimmed.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let raw = self.get("cookie")?;
        raw.split(';').find_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            (key.trim() == name).then(|| value.trim())
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Caller identity resolved from a verified token or a session lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier, from the token's `sub` claim (or `email` fallback)
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Unrecognized token claims, carried over unchanged
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            image: None,
            claims: HashMap::new(),
        }
    }
}

/// Per-invocation state threaded through the pipeline.
///
/// Created fresh at the start of each call and discarded at the end; never
/// shared across concurrent invocations.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Resolved caller, set by the auth step
    pub user: Option<User>,
    /// Current input; schema and sanitize steps replace it wholesale
    pub input: Value,
    /// Transport headers for this invocation
    pub headers: Headers,
    /// Cross-step scratch space (rate-limit outcome, audit configuration)
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(input: Value, headers: Headers) -> Self {
        Self {
            user: None,
            input,
            headers,
            metadata: HashMap::new(),
        }
    }
}
