//! The guard pipeline
//!
//! `builder` accumulates declared steps as pure data; `executor` runs them in
//! declared order at call time with short-circuit semantics.

mod builder;
mod executor;

pub use builder::Guard;
pub use executor::GuardedAction;
