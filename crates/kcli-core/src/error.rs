//! Error taxonomy shared by the gateway, the CLI and the AI layer.
//!
//! Every upstream Kubernetes error is translated here once, at the access
//! layer, and never re-raised verbatim. The string codes are stable on the
//! wire and across releases; the CLI exit codes derive from them.

use std::time::Duration;

/// Stable error kinds. The wire code is the variant name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("disabled: {0}")]
    Disabled(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable string code carried in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::Conflict(_) => "Conflict",
            Error::Forbidden(_) => "Forbidden",
            Error::Unauthenticated(_) => "Unauthenticated",
            Error::ResourceExhausted(_) => "ResourceExhausted",
            Error::FailedPrecondition(_) => "FailedPrecondition",
            Error::Aborted(_) => "Aborted",
            Error::Unavailable(_) => "Unavailable",
            Error::Transient(_) => "Transient",
            Error::DeadlineExceeded(_) => "DeadlineExceeded",
            Error::Cancelled(_) => "Cancelled",
            Error::Internal(_) => "Internal",
            Error::Disabled(_) => "Disabled",
            Error::BudgetExceeded(_) => "BudgetExceeded",
        }
    }

    /// Retries apply to idempotent reads only, and only for these kinds.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Unavailable(_))
    }

    /// CLI process exit code: 1 validation/invocation, 2 upstream API, 3 cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled(_) => 3,
            Error::InvalidArgument(_) | Error::FailedPrecondition(_) | Error::Disabled(_) => 1,
            _ => 2,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::InvalidArgument(m)
            | Error::NotFound(m)
            | Error::AlreadyExists(m)
            | Error::Conflict(m)
            | Error::Forbidden(m)
            | Error::Unauthenticated(m)
            | Error::ResourceExhausted(m)
            | Error::FailedPrecondition(m)
            | Error::Aborted(m)
            | Error::Unavailable(m)
            | Error::Transient(m)
            | Error::DeadlineExceeded(m)
            | Error::Cancelled(m)
            | Error::Internal(m)
            | Error::Disabled(m)
            | Error::BudgetExceeded(m) => m,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => match ae.code {
                400 | 422 => Error::InvalidArgument(ae.message),
                // Upstream 401 and 403 both surface as Forbidden; Unauthenticated is
                // reserved for the gateway's own bearer auth.
                401 | 403 => Error::Forbidden(ae.message),
                404 => Error::NotFound(ae.message),
                409 => {
                    if ae.reason == "AlreadyExists" {
                        Error::AlreadyExists(ae.message)
                    } else {
                        Error::Conflict(ae.message)
                    }
                }
                410 | 429 => Error::Transient(ae.message),
                c if c >= 500 => Error::Transient(ae.message),
                _ => Error::Internal(ae.message),
            },
            kube::Error::Auth(e) => Error::Unauthenticated(e.to_string()),
            kube::Error::SerdeError(e) => Error::Internal(format!("decode: {e}")),
            kube::Error::Discovery(e) => Error::NotFound(format!("discovery: {e}")),
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("json: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Internal(format!("yaml: {e}"))
    }
}

/// Bounded jittered exponential backoff for idempotent reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (1-based; attempt 1 has no delay).
    /// Full jitter: uniform in [0, base * 2^(n-2)] capped at max_delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = self.base_delay.saturating_mul(1u32 << (attempt - 2).min(16));
        let cap = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..=cap.as_millis() as u64);
        Duration::from_millis(jitter)
    }
}

/// Runs `op` under the policy. Mutations must not go through here; the
/// caller decides retry eligibility, this only gates on [`Error::is_retryable`].
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                tracing::debug!(target: "kcli::retry", attempt, error = %e, "retrying read");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::NotFound("x".into()).code(), "NotFound");
        assert_eq!(Error::BudgetExceeded("x".into()).code(), "BudgetExceeded");
        assert_eq!(Error::DeadlineExceeded("x".into()).code(), "DeadlineExceeded");
    }

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(Error::InvalidArgument("bad flag".into()).exit_code(), 1);
        assert_eq!(Error::NotFound("pod".into()).exit_code(), 2);
        assert_eq!(Error::Transient("apiserver 503".into()).exit_code(), 2);
        assert_eq!(Error::Cancelled("ctrl-c".into()).exit_code(), 3);
    }

    #[test]
    fn retryable_kinds() {
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(Error::Unavailable("x".into()).is_retryable());
        assert!(!Error::Conflict("x".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::ZERO);
        assert!(p.delay_for(2) <= p.max_delay);
        assert!(p.delay_for(10) <= p.max_delay);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let out = with_retries(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let out: Result<()> = with_retries(RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Forbidden("rbac".into())) }
        })
        .await;
        assert!(matches!(out, Err(Error::Forbidden(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
