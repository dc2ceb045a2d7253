//! Async test helpers
//!
//! Timeout wrappers for feeds, mode changes and background tasks.

use crate::core_access::OperatingMode;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    Elapsed,
    Closed,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::Elapsed => write!(f, "operation timed out"),
            TimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Run a future with a timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError::Elapsed)
}

/// Receive from a channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::Receiver<T>,
    duration: Duration,
) -> Result<T, TimeoutError> {
    with_timeout(duration, rx.recv())
        .await?
        .ok_or(TimeoutError::Closed)
}

/// Wait until the session reports `target`
pub async fn wait_for_mode(
    rx: &mut watch::Receiver<OperatingMode>,
    target: OperatingMode,
    duration: Duration,
) -> Result<(), TimeoutError> {
    with_timeout(duration, rx.wait_for(|mode| *mode == target))
        .await?
        .map(|_| ())
        .map_err(|_| TimeoutError::Closed)
}

/// Assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Assert a future does NOT complete within duration
pub async fn assert_times_out<F, T>(duration: Duration, future: F)
where
    F: Future<Output = T>,
{
    if timeout(duration, future).await.is_ok() {
        panic!("Expected future to timeout, but it completed within {:?}", duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_success() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(42).await.unwrap();

        let result = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_recv_timeout_closed() {
        let (tx, mut rx) = mpsc::channel::<i32>(1);
        drop(tx);

        let result = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), TimeoutError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_times_out() {
        let (_tx, mut rx) = mpsc::channel::<i32>(1);

        let result = recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), TimeoutError::Elapsed);
    }

    #[tokio::test]
    async fn test_wait_for_mode() {
        let (tx, mut rx) = watch::channel(OperatingMode::Locked);
        tx.send_replace(OperatingMode::DecoyOnly);

        wait_for_mode(&mut rx, OperatingMode::DecoyOnly, DEFAULT_TEST_TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_times_out() {
        assert_times_out(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        })
        .await;
    }
}
