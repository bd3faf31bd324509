use crate::client::EvalService;
use crate::error::{EvalError, Result};
use crate::models::RunHandle;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Blocking wait between remote calls
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Waits on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How often, and how many times, a run is re-fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the service reports a terminal status
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
        }
    }
}

/// Re-fetch `handle` until its status is terminal.
///
/// Waits `policy.interval` before every fetch. A handle that is already
/// terminal is returned untouched.
pub async fn poll_until_terminal<S, W>(
    service: &S,
    waiter: &W,
    policy: PollPolicy,
    handle: RunHandle,
) -> Result<RunHandle>
where
    S: EvalService + ?Sized,
    W: Waiter + ?Sized,
{
    let mut run = handle;
    let mut polls = 0u32;

    while !run.status.is_terminal() {
        if let Some(limit) = policy.max_polls {
            if polls >= limit {
                return Err(EvalError::PollLimit {
                    run_id: run.id,
                    polls,
                });
            }
        }

        tracing::info!(run_id = %run.id, status = %run.status, "waiting for run");
        waiter.wait(policy.interval).await;
        run = service.retrieve_run(&run.id, &run.eval_id).await?;
        polls += 1;
    }

    tracing::info!(run_id = %run.id, status = %run.status, polls, "run finished");
    Ok(run)
}
