//! Bounded retry for internal write conflicts.

use std::future::Future;
use std::time::Duration;

use token_ledger_core::{LedgerError, Result};

/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Initial backoff; doubles per attempt.
const BASE_BACKOFF: Duration = Duration::from_millis(10);

/// Run `operation`, retrying [`LedgerError::ConcurrencyConflict`] with
/// exponential backoff. Conflicts are internal; when the budget exhausts the
/// caller sees [`LedgerError::SystemBusy`].
///
/// # Errors
///
/// Any non-retryable error from `operation` is returned as-is.
pub async fn with_conflict_retries<T, F, Fut>(
    name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = BASE_BACKOFF;
    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(operation = name, attempt, %err, "retrying after conflict");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(operation = name, attempts = max_attempts, "retries exhausted");
                return Err(LedgerError::SystemBusy);
            }
            Err(err) => return Err(err),
        }
    }
    // 1..=max_attempts always returns above; max_attempts == 0 falls through.
    Err(LedgerError::SystemBusy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_conflicts_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_conflict_retries("test", 4, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::ConcurrencyConflict("wallet".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_busy() {
        let result: Result<()> = with_conflict_retries("test", 3, || async {
            Err(LedgerError::ConcurrencyConflict("wallet".into()))
        })
        .await;
        assert!(matches!(result, Err(LedgerError::SystemBusy)));
    }

    #[tokio::test]
    async fn non_retryable_errors_pass_through() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_conflict_retries("test", 4, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Validation("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
