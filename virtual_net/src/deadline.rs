//! Racing blocking waits against optional deadlines

use kernel_api::{KernelError, KernelResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Runs `fut` until it completes or `deadline` passes
///
/// `None` waits indefinitely. Only the local wait is abandoned on timeout;
/// anything `fut` already sent stays sent.
pub async fn race<F: Future>(deadline: Option<Instant>, fut: F) -> KernelResult<F::Output> {
    match deadline {
        None => Ok(fut.await),
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| KernelError::Timeout),
    }
}

/// Deadline `timeout` from now; a zero timeout means no deadline
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Some(Instant::now() + timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_race_times_out() {
        let deadline = deadline_after(Duration::from_millis(50));
        let result = race(deadline, std::future::pending::<()>()).await;
        assert_eq!(result, Err(KernelError::Timeout));
    }

    #[tokio::test]
    async fn test_race_without_deadline() {
        assert_eq!(race(None, async { 5 }).await, Ok(5));
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        assert!(deadline_after(Duration::ZERO).is_none());
    }
}
