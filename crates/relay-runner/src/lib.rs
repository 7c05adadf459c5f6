//! relay-runner
//!
//! The scheduler. Launches one long-running worker per shard task, paces
//! each worker with an exponential-backoff idle policy, bounds global
//! concurrency with a counting semaphore, and orchestrates graceful
//! shutdown via a shared cancellation token.

use std::sync::Arc;
use std::time::Duration;

use relay_router::ShardHandler;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Debug, Clone, Copy)]
pub struct RepeatPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_coefficient: u32,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        RepeatPolicy { initial_interval_ms: 100, max_interval_ms: 1000, backoff_coefficient: 2 }
    }
}

pub struct Runner {
    policy: RepeatPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    workers: JoinSet<()>,
}

impl Runner {
    pub fn new(policy: RepeatPolicy, max_workers: u32) -> Self {
        Runner {
            policy,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1) as usize)),
            cancel: CancellationToken::new(),
            workers: JoinSet::new(),
        }
    }

    /// Spawn one worker per shard handler. `part_count = 0` upstream simply
    /// means `handlers` is empty here, so no workers are created and no
    /// error is raised.
    pub fn run_tasks(&mut self, handlers: Vec<Box<dyn ShardHandler>>) {
        for handler in handlers {
            let handler: Arc<dyn ShardHandler> = Arc::from(handler);
            let semaphore = self.semaphore.clone();
            let cancel = self.cancel.clone();
            let policy = self.policy;
            self.workers.spawn(run_worker(handler, semaphore, cancel, policy));
        }
    }

    /// Trigger shutdown without waiting for workers to return. `stop` calls
    /// this internally; exposed separately for callers that want to
    /// request cancellation and join later (e.g. to log in between).
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Cancel every worker and wait for all of them to return, including
    /// any handler invocation already in flight.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while self.workers.join_next().await.is_some() {}
    }
}

async fn run_worker(
    handler: Arc<dyn ShardHandler>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    policy: RepeatPolicy,
) {
    let tag = handler.tag().to_string();
    let mut timeout = 0u64;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        if timeout > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(timeout)) => {}
                _ = cancel.cancelled() => return,
            }
        }

        let permit = tokio::select! {
            res = semaphore.clone().acquire_owned() => match res {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = cancel.cancelled() => return,
        };

        // Deliberately not selected against `cancel`: an in-flight poll must
        // be allowed to finish (commit or rollback cleanly) rather than be
        // aborted mid-flight, which would leave a published-but-uncommitted
        // batch behind.
        let call_handler = handler.clone();
        let outcome = tokio::spawn(async move {
            let _permit = permit;
            call_handler.call().await
        })
        .await;

        let (progressed, result) = match outcome {
            Ok(outcome) => outcome,
            Err(join_err) => (false, Err(anyhow::anyhow!(join_err))),
        };

        if let Err(e) = result {
            error!(shard = %tag, error = %e, "runner - handler failed, backing off");
        }

        timeout = next_timeout(timeout, progressed, &policy);
    }
}

/// The back-off state transition in isolation, matching the pseudocode: a
/// progressed poll resets to 0; anything else (including an error, which the
/// caller already folded into `progressed = false`) advances geometrically,
/// capped at `max_interval_ms`.
fn next_timeout(current: u64, progressed: bool, policy: &RepeatPolicy) -> u64 {
    if progressed {
        return 0;
    }
    if current == 0 {
        policy.initial_interval_ms
    } else {
        (current.saturating_mul(policy.backoff_coefficient as u64)).min(policy.max_interval_ms)
    }
}
