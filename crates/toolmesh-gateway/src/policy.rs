//! Admission and retry decisions for the dispatcher.
//!
//! These are pure functions of the backend's health, the tool's idempotency
//! flag, the attempt number and the error kind; the dispatcher performs the
//! I/O and asks here what to do next.

use std::fmt;
use std::time::Duration;

use toolmesh_common::GatewayError;

use crate::health::HealthStatus;

/// Total network attempts allowed for one call (the first plus one retry).
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Circuit open, fail fast without a network call
    Reject,
}

/// Whether a call may be sent to a backend in `status`.
///
/// `unknown` and `degraded` backends still take traffic; only `unhealthy`
/// is short-circuited.
pub fn admit(status: HealthStatus) -> Admission {
    if status.accepts_traffic() {
        Admission::Admit
    } else {
        Admission::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    NotIdempotent,
    NotTransient,
    AttemptsExhausted,
    CircuitOpen,
    DeadlineExhausted,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            GiveUpReason::NotIdempotent => "tool is not idempotent",
            GiveUpReason::NotTransient => "error is not retryable",
            GiveUpReason::AttemptsExhausted => "attempts exhausted",
            GiveUpReason::CircuitOpen => "backend circuit is open",
            GiveUpReason::DeadlineExhausted => "call deadline exhausted",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `backoff`, then try again
    Retry { backoff: Duration },
    GiveUp(GiveUpReason),
}

/// Everything the retry decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// Attempts already made (1 after the first failure)
    pub attempts: u32,
    pub idempotent: bool,
    pub error: &'a GatewayError,
    /// Backend status after the failure was recorded
    pub status: HealthStatus,
    /// Time left before the call deadline
    pub remaining: Duration,
    pub backoff: Duration,
}

/// Decides whether a failed attempt is retried.
///
/// A retry needs all of: an idempotent tool, a transient error, a spare
/// attempt, a closed circuit, and enough time left to sleep and try again.
pub fn should_retry(ctx: &RetryContext<'_>) -> RetryDecision {
    if !ctx.idempotent {
        return RetryDecision::GiveUp(GiveUpReason::NotIdempotent);
    }
    if !ctx.error.is_transient() {
        return RetryDecision::GiveUp(GiveUpReason::NotTransient);
    }
    if ctx.attempts >= MAX_ATTEMPTS {
        return RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted);
    }
    if admit(ctx.status) == Admission::Reject {
        return RetryDecision::GiveUp(GiveUpReason::CircuitOpen);
    }
    if ctx.remaining <= ctx.backoff {
        return RetryDecision::GiveUp(GiveUpReason::DeadlineExhausted);
    }
    RetryDecision::Retry {
        backoff: ctx.backoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> GatewayError {
        GatewayError::Transport {
            backend: "git".into(),
            message: "connection reset".into(),
        }
    }

    fn ctx(error: &GatewayError) -> RetryContext<'_> {
        RetryContext {
            attempts: 1,
            idempotent: true,
            error,
            status: HealthStatus::Degraded,
            remaining: Duration::from_secs(10),
            backoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_admit() {
        assert_eq!(admit(HealthStatus::Unknown), Admission::Admit);
        assert_eq!(admit(HealthStatus::Healthy), Admission::Admit);
        assert_eq!(admit(HealthStatus::Degraded), Admission::Admit);
        assert_eq!(admit(HealthStatus::Unhealthy), Admission::Reject);
    }

    #[test]
    fn test_retry_transient_idempotent() {
        let err = transport();
        assert_eq!(
            should_retry(&ctx(&err)),
            RetryDecision::Retry {
                backoff: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_never_retry_non_idempotent() {
        let err = transport();
        let decision = should_retry(&RetryContext {
            idempotent: false,
            ..ctx(&err)
        });
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::NotIdempotent));
    }

    #[test]
    fn test_at_most_two_attempts() {
        let err = transport();
        let decision = should_retry(&RetryContext {
            attempts: 2,
            ..ctx(&err)
        });
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted));
    }

    #[test]
    fn test_error_kinds() {
        let timeout = GatewayError::UpstreamTimeout {
            backend: "git".into(),
            timeout_ms: 50,
        };
        assert!(matches!(should_retry(&ctx(&timeout)), RetryDecision::Retry { .. }));

        let bad_gateway = GatewayError::UpstreamStatus {
            backend: "git".into(),
            status: 503,
        };
        assert!(matches!(should_retry(&ctx(&bad_gateway)), RetryDecision::Retry { .. }));

        for err in [
            GatewayError::UpstreamStatus {
                backend: "git".into(),
                status: 400,
            },
            GatewayError::ToolFailed {
                backend: "git".into(),
                message: "nothing to commit".into(),
            },
            GatewayError::InvalidResponse {
                backend: "git".into(),
                message: "not json".into(),
            },
        ] {
            assert_eq!(
                should_retry(&ctx(&err)),
                RetryDecision::GiveUp(GiveUpReason::NotTransient),
                "{err}"
            );
        }
    }

    #[test]
    fn test_no_retry_once_circuit_opens() {
        let err = transport();
        let decision = should_retry(&RetryContext {
            status: HealthStatus::Unhealthy,
            ..ctx(&err)
        });
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::CircuitOpen));
    }

    #[test]
    fn test_no_retry_past_deadline() {
        let err = transport();
        let decision = should_retry(&RetryContext {
            remaining: Duration::from_millis(50),
            ..ctx(&err)
        });
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::DeadlineExhausted));
    }
}
