use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::pipeline::agents::AgentError;

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `op` receives the 1-based attempt number. Only transient errors are
/// retried; the backoff sleep is raced against `cancel`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, AgentError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Extraction attempt failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(attempt, error = %e, "Extraction retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5,
            attempt_timeout_secs: 1,
        }
    }

    fn unavailable() -> AgentError {
        AgentError::ModelUnavailable {
            reason: "connection refused".into(),
            retryable: true,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(2), &CancellationToken::new(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt <= 2 {
                    Err(unavailable())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&fast_policy(2), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::ExtractionTimeout(Duration::from_secs(1))) }
            })
            .await;
        assert!(matches!(result, Err(AgentError::ExtractionTimeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&fast_policy(5), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::MalformedSchema("not json".into())) }
            })
            .await;
        assert!(matches!(result, Err(AgentError::MalformedSchema(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
            ..fast_policy(3)
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result: Result<(), _> =
            tokio::time::timeout(Duration::from_secs(5), with_retry(&policy, &cancel, |_| async {
                Err(unavailable())
            }))
            .await
            .expect("retry loop should observe cancellation");
        assert_eq!(result, Err(AgentError::Cancelled));
    }
}
