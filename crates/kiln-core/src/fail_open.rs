//! Fail-open helper for infrastructure work
//!
//! Persistence of history snapshots and similar bookkeeping must never turn a
//! finished task into a failed one. Step execution, safety checks and
//! planning do NOT go through here.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use kiln_core::fail_open::fail_open;
/// use kiln_core::Result;
///
/// async fn persist() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let saved = fail_open("history::persist", || persist()).await;
///     // saved is None if persist() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KilnError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, KilnError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(KilnError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
