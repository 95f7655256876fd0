//! Cancellable polling shared by the boot readiness wait and the
//! debug-on-error recovery wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::{Result, SessionError};

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ready,
    NotYet,
}

#[derive(Debug, Clone, Copy)]
pub struct PollPlan {
    pub interval: Duration,
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
}

impl PollPlan {
    pub fn new(interval: Duration, attempt_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            attempt_timeout,
            max_attempts,
        }
    }
}

/// Run `op` until it reports `Probe::Ready`.
///
/// A probe that exceeds `attempt_timeout` is cancelled and counted as
/// `NotYet`. An `Err` from `op` is fatal and propagates immediately.
/// Exhausting `max_attempts` converts to `VmUnreachable`.
pub async fn poll_until<F, Fut>(plan: PollPlan, what: &str, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe>>,
{
    for attempt in 1..=plan.max_attempts {
        match timeout(plan.attempt_timeout, op()).await {
            Ok(Ok(Probe::Ready)) => {
                debug!(what, attempt, "Poll ready");
                return Ok(());
            }
            Ok(Ok(Probe::NotYet)) => {
                debug!(what, attempt, "Poll not ready yet");
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(what, attempt, "Probe timed out, treating as not ready");
            }
        }

        if attempt < plan.max_attempts {
            sleep(plan.interval).await;
        }
    }

    Err(SessionError::VmUnreachable(format!(
        "{} not ready after {} attempts",
        what, plan.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_plan(max_attempts: u32) -> PollPlan {
        PollPlan::new(
            Duration::from_millis(1),
            Duration::from_millis(50),
            max_attempts,
        )
    }

    #[tokio::test]
    async fn test_ready_on_first_attempt() {
        let result = poll_until(fast_plan(3), "test", || async { Ok(Probe::Ready) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_retries_until_ready() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let result = poll_until(fast_plan(5), "test", move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(Probe::NotYet)
                } else {
                    Ok(Probe::Ready)
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unreachable() {
        let result = poll_until(fast_plan(2), "test", || async { Ok(Probe::NotYet) }).await;
        assert!(matches!(result, Err(SessionError::VmUnreachable(_))));
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_without_retry() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let result = poll_until(fast_plan(5), "test", move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(SessionError::VmUnreachable("connection refused".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(SessionError::VmUnreachable(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_not_yet() {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let plan = PollPlan::new(Duration::from_millis(1), Duration::from_millis(5), 3);
        let result = poll_until(plan, "test", move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    sleep(Duration::from_secs(10)).await;
                }
                Ok(Probe::Ready)
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
