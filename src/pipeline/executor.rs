//! Call-time execution of a compiled action

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::audit::{AuditConfig, AuditRecord, AuditSink};
use crate::auth::AuthProvider;
use crate::context::{ExecutionContext, Headers, User};
use crate::csrf::{self, CsrfConfig};
use crate::error::{ActionResult, ErrorCode};
use crate::ratelimit::{RateLimitConfig, SlidingWindowLimiter};
use crate::sanitize::sanitize_value;
use crate::schema::SchemaValidator;

/// Shared bucket for unauthenticated callers with no identifier function and
/// no derivable IP. Intentional: callers wanting per-user isolation supply an
/// identifier function.
const ANONYMOUS_KEY: &str = "anonymous";

const METADATA_RATE_LIMIT: &str = "rateLimit";
const METADATA_AUDIT: &str = "audit";

pub(crate) type BoxHandler<T> = Arc<
    dyn Fn(Value, Option<User>) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>
        + Send
        + Sync,
>;

pub(crate) enum CompiledStep {
    Auth,
    Schema(Arc<dyn SchemaValidator>),
    RateLimit {
        config: RateLimitConfig,
        limiter: Arc<SlidingWindowLimiter>,
    },
    Csrf,
    Sanitize,
    Audit(AuditConfig),
}

/// A terminal step outcome; stops the pipeline immediately.
struct StepFailure {
    code: ErrorCode,
    message: String,
}

impl StepFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A compiled action: the declared checks plus the handler, as one callable.
///
/// Each invocation builds a fresh [`ExecutionContext`], runs the steps in
/// declared order, short-circuits on the first failure (no later step, and
/// not the handler, executes), then runs the handler. Failures only ever
/// surface as [`ActionResult::Failure`]; nothing escapes as an error.
pub struct GuardedAction<T> {
    steps: Arc<[CompiledStep]>,
    handler: BoxHandler<T>,
    provider: Option<Arc<AuthProvider>>,
    csrf_config: CsrfConfig,
    sink: Arc<dyn AuditSink>,
}

impl<T> Clone for GuardedAction<T> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            handler: Arc::clone(&self.handler),
            provider: self.provider.clone(),
            csrf_config: self.csrf_config.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<T: Send + 'static> GuardedAction<T> {
    pub(crate) fn new(
        steps: Vec<CompiledStep>,
        handler: BoxHandler<T>,
        provider: Option<Arc<AuthProvider>>,
        csrf_config: CsrfConfig,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            steps: steps.into(),
            handler,
            provider,
            csrf_config,
            sink,
        }
    }

    /// Run the pipeline against `input` with the caller's transport headers.
    ///
    /// Pass an empty `Headers` when no transport integration is wired; CSRF
    /// and auth checks then degrade to their "absent" failure paths.
    pub async fn invoke(&self, input: Value, headers: Headers) -> ActionResult<T> {
        let mut ctx = ExecutionContext::new(input, headers);

        for step in self.steps.iter() {
            if let Err(failure) = self.run_step(step, &mut ctx).await {
                return ActionResult::failure(failure.code, failure.message);
            }
        }

        // the context is done with the input; hand it to the handler without
        // a copy
        let input = std::mem::take(&mut ctx.input);
        let user = ctx.user.clone();
        match (self.handler)(input, user).await {
            Ok(data) => {
                // audit fires on the success path only, stamped right after
                // handler completion
                self.emit_audit(&ctx);
                ActionResult::success(data)
            }
            Err(err) => {
                tracing::error!(error = %err, "handler failed");
                ActionResult::failure(ErrorCode::InternalError, err.to_string())
            }
        }
    }

    async fn run_step(
        &self,
        step: &CompiledStep,
        ctx: &mut ExecutionContext,
    ) -> Result<(), StepFailure> {
        match step {
            CompiledStep::Auth => {
                let provider = self.provider.as_ref().ok_or_else(|| {
                    StepFailure::new(ErrorCode::InternalError, "no auth provider configured")
                })?;
                match provider.resolve(&ctx.headers).await {
                    Some(user) => {
                        ctx.user = Some(user);
                        Ok(())
                    }
                    None => Err(StepFailure::new(
                        ErrorCode::AuthFailed,
                        "authentication required",
                    )),
                }
            }
            CompiledStep::Schema(validator) => match validator.validate(&ctx.input) {
                Ok(validated) => {
                    ctx.input = validated;
                    Ok(())
                }
                Err(message) => Err(StepFailure::new(ErrorCode::ValidationError, message)),
            },
            CompiledStep::RateLimit { config, limiter } => {
                let key = resolve_rate_limit_key(config, ctx);
                let decision = limiter.check(&key, config.max_requests(), config.window_ms());
                if !decision.allowed {
                    tracing::debug!(key = %key, window = %config.window(), "rate limit exceeded");
                    return Err(StepFailure::new(
                        ErrorCode::RateLimited,
                        "Rate limit exceeded",
                    ));
                }
                ctx.metadata.insert(
                    METADATA_RATE_LIMIT.to_string(),
                    json!({
                        "remaining": decision.remaining,
                        "resetAt": decision.reset_at,
                    }),
                );
                Ok(())
            }
            CompiledStep::Csrf => csrf::validate(&ctx.headers, &self.csrf_config)
                .map_err(|err| StepFailure::new(ErrorCode::CsrfFailed, err.to_string())),
            CompiledStep::Sanitize => {
                ctx.input = sanitize_value(&ctx.input);
                Ok(())
            }
            CompiledStep::Audit(config) => {
                ctx.metadata.insert(
                    METADATA_AUDIT.to_string(),
                    json!({
                        "action": config.action,
                        "resource": config.resource,
                    }),
                );
                Ok(())
            }
        }
    }

    fn emit_audit(&self, ctx: &ExecutionContext) {
        // success means every declared step ran; the last declared audit
        // configuration wins, matching the metadata overwrite order
        let Some(config) = self.steps.iter().rev().find_map(|step| match step {
            CompiledStep::Audit(config) => Some(config),
            _ => None,
        }) else {
            return;
        };
        let user_id = ctx
            .user
            .as_ref()
            .map(|user| user.id.clone())
            .unwrap_or_else(|| "anonymous".to_string());

        self.sink.emit(&AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action: config.action.clone(),
            resource: config.resource.clone(),
            user_id,
            success: true,
        });
    }
}

/// Strict key precedence: per-step identifier function, resolved user,
/// left-most forwarded-for entry, real-IP header, shared anonymous bucket.
fn resolve_rate_limit_key(config: &RateLimitConfig, ctx: &ExecutionContext) -> String {
    if let Some(identifier) = config.identifier() {
        return identifier(ctx);
    }
    if let Some(user) = &ctx.user {
        return format!("user:{}", user.id);
    }
    if let Some(forwarded) = ctx.headers.get("x-forwarded-for") {
        if let Some(ip) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return format!("ip:{ip}");
        }
    }
    if let Some(ip) = ctx.headers.get("x-real-ip") {
        let ip = ip.trim();
        if !ip.is_empty() {
            return format!("ip:{ip}");
        }
    }
    ANONYMOUS_KEY.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_headers(pairs: &[(&str, &str)]) -> ExecutionContext {
        ExecutionContext::new(json!({}), pairs.iter().copied().collect())
    }

    fn config() -> RateLimitConfig {
        RateLimitConfig::new(10, "1m").unwrap()
    }

    #[test]
    fn test_key_identifier_takes_priority() {
        let config = config().with_identifier(|ctx| {
            format!("tenant:{}", ctx.input.get("tenant").and_then(Value::as_str).unwrap_or("?"))
        });
        let mut ctx = ctx_with_headers(&[("x-forwarded-for", "1.2.3.4")]);
        ctx.user = Some(User::new("u1"));
        ctx.input = json!({"tenant": "acme"});
        assert_eq!(resolve_rate_limit_key(&config, &ctx), "tenant:acme");
    }

    #[test]
    fn test_key_user_beats_ip_headers() {
        let mut ctx = ctx_with_headers(&[("x-forwarded-for", "1.2.3.4")]);
        ctx.user = Some(User::new("u1"));
        assert_eq!(resolve_rate_limit_key(&config(), &ctx), "user:u1");
    }

    #[test]
    fn test_key_forwarded_for_takes_leftmost_entry() {
        let ctx = ctx_with_headers(&[
            ("x-forwarded-for", "192.168.1.1, 10.0.0.1, 172.16.0.1"),
            ("x-real-ip", "2.2.2.2"),
        ]);
        assert_eq!(resolve_rate_limit_key(&config(), &ctx), "ip:192.168.1.1");
    }

    #[test]
    fn test_key_real_ip_fallback() {
        let ctx = ctx_with_headers(&[("x-real-ip", "10.0.0.5")]);
        assert_eq!(resolve_rate_limit_key(&config(), &ctx), "ip:10.0.0.5");
    }

    #[test]
    fn test_key_collapses_to_shared_anonymous_bucket() {
        let ctx = ctx_with_headers(&[]);
        assert_eq!(resolve_rate_limit_key(&config(), &ctx), "anonymous");
    }

    #[test]
    fn test_key_empty_forwarded_for_falls_through() {
        let ctx = ctx_with_headers(&[("x-forwarded-for", " "), ("x-real-ip", "9.9.9.9")]);
        assert_eq!(resolve_rate_limit_key(&config(), &ctx), "ip:9.9.9.9");
    }
}
