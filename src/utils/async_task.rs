use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::Error;
use crate::Result;
use crate::RetryPolicy;

/// Outcome of a task that used up its retry budget
#[derive(Debug)]
pub(crate) struct BackoffExhausted {
    pub(crate) attempts: usize,
    pub(crate) last_error: Error,
}

/// Runs `task` until it succeeds, bounding each attempt by `attempt_timeout`
/// and waiting `policy.delay_for(n)` after the n-th failure.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: RetryPolicy,
    attempt_timeout: Duration,
) -> std::result::Result<P, BackoffExhausted>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;
    loop {
        let last_error = match timeout(attempt_timeout, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(attempt, "task failed with error: {:?}", &e);
                e
            }
            Err(_) => {
                warn!(attempt, "task timed out after {:?}", attempt_timeout);
                Error::ConnectTimeout(attempt_timeout)
            }
        };

        attempt += 1;
        if attempt >= max_attempts {
            warn!("task failed after {} attempts", attempt);
            return Err(BackoffExhausted {
                attempts: attempt,
                last_error,
            });
        }
        sleep(policy.delay_for(attempt - 1)).await;
    }
}

/// Spawns a named background task and logs how it ended
pub(crate) fn spawn_task<Fut>(
    name: &str,
    fut: Fut,
) -> JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
