//! Bounded retry of read-modify-write operations that lose an optimistic
//! concurrency race.

use crate::error::{OperatorError, Result};
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;

/// Attempts made before a conflict is returned to the caller.
pub const MAX_CONFLICT_ATTEMPTS: usize = 5;

/// Backoff between conflicting attempts.
fn conflict_backoff() -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff::default();
    backoff.initial_interval = Duration::from_millis(10);
    backoff.current_interval = Duration::from_millis(10);
    backoff.max_interval = Duration::from_millis(500);
    backoff.max_elapsed_time = Some(Duration::from_secs(10));
    backoff
}

/// Run `operation` until it succeeds, fails with something other than a
/// conflict, or has been tried [`MAX_CONFLICT_ATTEMPTS`] times.
///
/// `operation` must re-read the object it writes on every call.
pub async fn retry_on_conflict<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    backoff::future::retry(conflict_backoff(), || {
        attempts += 1;
        let last_attempt = attempts >= MAX_CONFLICT_ATTEMPTS;
        let attempt = operation();
        async move {
            attempt.await.map_err(|err: OperatorError| {
                if err.is_conflict() && !last_attempt {
                    backoff::Error::Transient(err)
                } else {
                    backoff::Error::Permanent(err)
                }
            })
        }
    })
    .await
}
