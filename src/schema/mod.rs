//! External schema-validation collaborator contract
//!
//! Schema semantics are out of scope for this crate; the pipeline only
//! depends on this narrow contract. Any external validation capability plugs
//! in here, either as a type or as a bare closure.

use serde_json::Value;

/// A schema step delegate: given the raw input, return the validated
/// (possibly coerced) value, or a rejection message.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, input: &Value) -> Result<Value, String>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value) -> Result<Value, String> + Send + Sync,
{
    fn validate(&self, input: &Value) -> Result<Value, String> {
        self(input)
    }
}
