//! Sequential model fallback.
//!
//! One attempt per model, in order, inspecting each outcome before moving
//! on. Racing models in parallel is deliberately avoided; cost stays
//! bounded and latency is attributable to a single attempt at a time.

use tracing::{info, warn};

use super::gemini::{AttemptOutcome, GenerateRequest, GenerativeBackend, RetryReason};

/// Models tried in order until one yields a usable reply.
pub const DEFAULT_MODEL_CHAIN: [&str; 3] =
    ["gemini-2.0-flash", "gemini-2.0-flash-lite", "gemini-1.5-flash"];

/// Terminal result of walking the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainResult {
    /// A model produced a non-empty reply.
    Reply(String),
    /// A model withheld its reply on content-policy grounds.
    SafetyRefusal,
    /// The credential was rejected; answered as 503 without trying further.
    AuthError,
    /// The upstream rejected the request shape outright; answered as 502.
    UpstreamRejected,
    /// Every model in the chain was rate-limited.
    AllRateLimited {
        retry_after_ms: Option<u64>,
        attempted: Vec<String>,
    },
    /// The chain ran out of models without a reply.
    Exhausted {
        timed_out: bool,
        attempted: Vec<String>,
    },
}

/// Walk `models` in order until one attempt settles the request.
pub async fn run_chain(
    backend: &dyn GenerativeBackend,
    models: &[String],
    request: &GenerateRequest,
) -> ChainResult {
    let mut attempted = Vec::with_capacity(models.len());
    let mut all_rate_limited = true;
    let mut best_hint: Option<u64> = None;
    let mut last_timed_out = false;

    for model in models {
        attempted.push(model.clone());
        match backend.generate(model, request).await {
            AttemptOutcome::Reply(text) => {
                info!("{model} answered after {} attempt(s)", attempted.len());
                return ChainResult::Reply(text);
            }
            AttemptOutcome::SafetyBlocked => {
                info!("{model} blocked the prompt on safety grounds");
                return ChainResult::SafetyRefusal;
            }
            AttemptOutcome::AuthFailed => {
                warn!("{model} rejected the API credential; aborting chain");
                return ChainResult::AuthError;
            }
            AttemptOutcome::Rejected(status) => {
                warn!("{model} rejected the request with {status}; aborting chain");
                return ChainResult::UpstreamRejected;
            }
            AttemptOutcome::RateLimited { retry_after_ms } => {
                warn!("{model} is rate-limited (hint: {retry_after_ms:?})");
                best_hint = best_hint.max(retry_after_ms);
                last_timed_out = false;
            }
            AttemptOutcome::Retryable(reason) => {
                warn!("{model} attempt failed: {reason}");
                all_rate_limited = false;
                last_timed_out = reason == RetryReason::Timeout;
            }
        }
    }

    if all_rate_limited {
        ChainResult::AllRateLimited {
            retry_after_ms: best_hint,
            attempted,
        }
    } else {
        ChainResult::Exhausted {
            timed_out: last_timed_out,
            attempted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::proxy::gemini::Content;

    struct ScriptedBackend {
        outcomes: Mutex<VecDeque<AttemptOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(outcomes: Vec<AttemptOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn generate(&self, _model: &str, _request: &GenerateRequest) -> AttemptOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .pop_front()
                .expect("more attempts than scripted outcomes")
        }
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new(vec![Content::user("hi")])
    }

    #[tokio::test]
    async fn first_reply_stops_the_chain() {
        let backend = ScriptedBackend::new(vec![AttemptOutcome::Reply("hello".into())]);
        let result = run_chain(&backend, &models(&["a", "b", "c"]), &request()).await;

        assert_eq!(result, ChainResult::Reply("hello".into()));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_fall_through_to_later_models() {
        let backend = ScriptedBackend::new(vec![
            AttemptOutcome::Retryable(RetryReason::ServerError(500)),
            AttemptOutcome::Retryable(RetryReason::MalformedReply),
            AttemptOutcome::Reply("third time".into()),
        ]);
        let result = run_chain(&backend, &models(&["a", "b", "c"]), &request()).await;

        assert_eq!(result, ChainResult::Reply("third time".into()));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_aborts_without_trying_the_rest() {
        let backend = ScriptedBackend::new(vec![AttemptOutcome::AuthFailed]);
        let result = run_chain(&backend, &models(&["a", "b", "c"]), &request()).await;

        assert_eq!(result, ChainResult::AuthError);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn upstream_rejection_aborts_the_chain() {
        let backend = ScriptedBackend::new(vec![AttemptOutcome::Rejected(400)]);
        let result = run_chain(&backend, &models(&["a", "b"]), &request()).await;

        assert_eq!(result, ChainResult::UpstreamRejected);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn safety_block_settles_the_request() {
        let backend = ScriptedBackend::new(vec![
            AttemptOutcome::Retryable(RetryReason::Network),
            AttemptOutcome::SafetyBlocked,
        ]);
        let result = run_chain(&backend, &models(&["a", "b", "c"]), &request()).await;

        assert_eq!(result, ChainResult::SafetyRefusal);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn all_rate_limited_reports_every_model_and_the_max_hint() {
        let backend = ScriptedBackend::new(vec![
            AttemptOutcome::RateLimited {
                retry_after_ms: Some(5_000),
            },
            AttemptOutcome::RateLimited {
                retry_after_ms: None,
            },
            AttemptOutcome::RateLimited {
                retry_after_ms: Some(30_000),
            },
        ]);
        let result = run_chain(&backend, &models(&["a", "b", "c"]), &request()).await;

        assert_eq!(
            result,
            ChainResult::AllRateLimited {
                retry_after_ms: Some(30_000),
                attempted: models(&["a", "b", "c"]),
            }
        );
    }

    #[tokio::test]
    async fn mixed_failures_exhaust_rather_than_rate_limit() {
        let backend = ScriptedBackend::new(vec![
            AttemptOutcome::RateLimited {
                retry_after_ms: Some(5_000),
            },
            AttemptOutcome::Retryable(RetryReason::ServerError(502)),
        ]);
        let result = run_chain(&backend, &models(&["a", "b"]), &request()).await;

        assert_eq!(
            result,
            ChainResult::Exhausted {
                timed_out: false,
                attempted: models(&["a", "b"]),
            }
        );
    }

    #[tokio::test]
    async fn trailing_timeout_is_reported_as_such() {
        let backend = ScriptedBackend::new(vec![
            AttemptOutcome::Retryable(RetryReason::ServerError(500)),
            AttemptOutcome::Retryable(RetryReason::Timeout),
        ]);
        let result = run_chain(&backend, &models(&["a", "b"]), &request()).await;

        assert_eq!(
            result,
            ChainResult::Exhausted {
                timed_out: true,
                attempted: models(&["a", "b"]),
            }
        );
    }
}
