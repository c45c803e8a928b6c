//! Step declaration and compilation

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::audit::{AuditConfig, AuditSink, TracingSink};
use crate::auth::AuthProvider;
use crate::context::User;
use crate::csrf::CsrfConfig;
use crate::ratelimit::{RateLimitConfig, SlidingWindowLimiter};
use crate::schema::SchemaValidator;

use super::executor::{BoxHandler, CompiledStep, GuardedAction};

/// One declared pipeline step. Declaration never executes anything.
#[derive(Clone)]
enum Step {
    Auth,
    Schema(Arc<dyn SchemaValidator>),
    RateLimit(RateLimitConfig),
    Csrf,
    Sanitize,
    Audit(AuditConfig),
}

/// Immutable step-chaining builder.
///
/// Every chaining method returns a new `Guard` holding the old steps plus the
/// new one; the receiver is never mutated. A base guard can therefore be
/// reused across differently-configured actions without step leakage.
/// Declaring the same step kind twice is permitted; both instances execute in
/// declared order.
#[derive(Clone)]
pub struct Guard {
    steps: Vec<Step>,
    provider: Option<Arc<AuthProvider>>,
    csrf_config: CsrfConfig,
    sink: Arc<dyn AuditSink>,
    // shared across clones so actions compiled from one guard family reuse
    // limiter instances for identical configurations
    limiters: Arc<Mutex<HashMap<String, Arc<SlidingWindowLimiter>>>>,
}

impl Guard {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            provider: None,
            csrf_config: CsrfConfig::default(),
            sink: Arc::new(TracingSink),
            limiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Guard with an auth provider wired for `auth()` steps.
    pub fn with_provider(provider: AuthProvider) -> Self {
        let mut guard = Self::new();
        guard.provider = Some(Arc::new(provider));
        guard
    }

    /// Replace the auth provider.
    pub fn provider(&self, provider: AuthProvider) -> Self {
        let mut next = self.clone();
        next.provider = Some(Arc::new(provider));
        next
    }

    /// Replace the audit sink (defaults to the tracing sink).
    pub fn audit_sink(&self, sink: Arc<dyn AuditSink>) -> Self {
        let mut next = self.clone();
        next.sink = sink;
        next
    }

    /// Override the CSRF channel names used by `csrf()` steps.
    pub fn csrf_config(&self, config: CsrfConfig) -> Self {
        let mut next = self.clone();
        next.csrf_config = config;
        next
    }

    fn with_step(&self, step: Step) -> Self {
        let mut next = self.clone();
        next.steps.push(step);
        next
    }

    /// Require a resolved user; fails the call with `AUTH_FAILED` otherwise.
    pub fn auth(&self) -> Self {
        self.with_step(Step::Auth)
    }

    /// Validate (and possibly coerce) the input through `validator`.
    pub fn schema(&self, validator: impl SchemaValidator + 'static) -> Self {
        self.with_step(Step::Schema(Arc::new(validator)))
    }

    /// Enforce a sliding-window budget for this action.
    pub fn rate_limit(&self, config: RateLimitConfig) -> Self {
        self.with_step(Step::RateLimit(config))
    }

    /// Require a matching double-submit CSRF token pair.
    pub fn csrf(&self) -> Self {
        self.with_step(Step::Csrf)
    }

    /// HTML-escape the input in place.
    pub fn sanitize(&self) -> Self {
        self.with_step(Step::Sanitize)
    }

    /// Emit an audit record after handler success.
    pub fn audit(&self, action: impl Into<String>, resource: impl Into<String>) -> Self {
        self.with_step(Step::Audit(AuditConfig::new(action, resource)))
    }

    /// Compile the declared steps around `handler` into a single callable.
    ///
    /// The result may be invoked concurrently and repeatedly; invocations are
    /// independent except for the rate-limit state intentionally shared
    /// through the limiter cache. With zero declared steps this degenerates
    /// to "run the handler with an empty context".
    pub fn action<F, Fut, T>(&self, handler: F) -> GuardedAction<T>
    where
        F: Fn(Value, Option<User>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let steps: Vec<CompiledStep> = self
            .steps
            .iter()
            .map(|step| match step {
                Step::Auth => CompiledStep::Auth,
                Step::Schema(validator) => CompiledStep::Schema(Arc::clone(validator)),
                Step::RateLimit(config) => CompiledStep::RateLimit {
                    limiter: self.limiter_for(config),
                    config: config.clone(),
                },
                Step::Csrf => CompiledStep::Csrf,
                Step::Sanitize => CompiledStep::Sanitize,
                Step::Audit(config) => CompiledStep::Audit(config.clone()),
            })
            .collect();

        let handler: BoxHandler<T> = Arc::new(move |input, user| {
            Box::pin(handler(input, user))
                as Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>
        });

        GuardedAction::new(
            steps,
            handler,
            self.provider.clone(),
            self.csrf_config.clone(),
            Arc::clone(&self.sink),
        )
    }

    /// One limiter per distinct rate-limit configuration, so the window never
    /// has to be re-parsed and repeated steps with identical configuration
    /// share state.
    fn limiter_for(&self, config: &RateLimitConfig) -> Arc<SlidingWindowLimiter> {
        let mut cache = self.limiters.lock().unwrap();
        Arc::clone(
            cache
                .entry(config.limiter_key())
                .or_insert_with(|| Arc::new(SlidingWindowLimiter::new())),
        )
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new()
    }
}
