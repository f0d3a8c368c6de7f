use crate::{config::RetryPolicy, error::MessagingResult};
use std::{future::Future, time::Duration};
use tracing::{info, warn};

/// Run an idempotent read, retrying transient store failures with
/// exponential backoff. Non-transient errors are returned immediately.
///
/// Never wrap writes in this: a retried send could duplicate a message.
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> MessagingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MessagingResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Read succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Read failed, will retry"
                );

                tokio::time::sleep(backoff_for(policy, attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Upper bound for a single retry pause.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Pause before retrying after failed `attempt` (1-based): the initial
/// backoff doubled per attempt, capped at `MAX_BACKOFF`.
fn backoff_for(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    policy.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
}
