//! Bounded, retrying worker pool for per-item fan-out.
//!
//! Every item is attempted up to `1 + max_retries` times while its failures
//! are transient. An item that still fails, or whose worker panics, is
//! replaced by a degraded placeholder, so per-item failures never abort the
//! batch. Results come back in completion order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use nexus_shared::{NexusError, Result};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    workers: usize,
    max_retries: u32,
}

impl TaskPool {
    pub fn new(workers: usize, max_retries: u32) -> Self {
        Self {
            workers,
            max_retries,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` over `items` with at most `workers` concurrent invocations.
    ///
    /// Once `cancel` fires no further item starts and failed items are not
    /// retried; items already running finish and are returned.
    /// `on_progress(done, total)` is called once per finished item.
    pub async fn run<I, O, F, Fut, D, P>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        mut on_progress: P,
        op: F,
        degrade: D,
    ) -> Result<Vec<O>>
    where
        I: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
        D: Fn(&I, &NexusError) -> O + Send + Sync + 'static,
        P: FnMut(usize, usize),
    {
        if self.workers == 0 {
            return Err(NexusError::validation("task pool needs at least one worker"));
        }

        let total = items.len();
        let op = Arc::new(op);
        let degrade = Arc::new(degrade);
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        let mut results = Vec::with_capacity(total);
        let mut in_flight: HashMap<Id, I> = HashMap::new();
        let mut done = 0usize;

        let mut collect = |joined: std::result::Result<(Id, O), JoinError>,
                           in_flight: &mut HashMap<Id, I>,
                           results: &mut Vec<O>| {
            done += 1;
            match joined {
                Ok((id, output)) => {
                    in_flight.remove(&id);
                    results.push(output);
                }
                Err(e) => {
                    error!(error = %e, "pool worker failed; degrading its item");
                    if let Some(item) = in_flight.remove(&e.id()) {
                        let reason = NexusError::Worker(e.to_string());
                        results.push(degrade(&item, &reason));
                    }
                }
            }
            on_progress(done, total);
        };

        let mut pending = items.into_iter();
        let mut next = pending.next();

        while let Some(item) = next.take() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(remaining = pending.len() + 1, "pool cancelled; no further items start");
                    break;
                }
                Some(joined) = set.join_next_with_id(), if !set.is_empty() => {
                    collect(joined, &mut in_flight, &mut results);
                    next = Some(item);
                }
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    if cancel.is_cancelled() {
                        break;
                    }

                    let op = Arc::clone(&op);
                    let degrade = Arc::clone(&degrade);
                    let cancel = cancel.clone();
                    let max_retries = self.max_retries;
                    let kept = item.clone();

                    let handle = set.spawn(async move {
                        let _permit = permit;
                        match attempt(item, op.as_ref(), max_retries, &cancel).await {
                            Ok(output) => output,
                            Err((item, e)) => {
                                warn!(error = %e, "work unit failed after retries; degrading");
                                degrade(&item, &e)
                            }
                        }
                    });
                    in_flight.insert(handle.id(), kept);

                    next = pending.next();
                }
            }
        }

        while let Some(joined) = set.join_next_with_id().await {
            collect(joined, &mut in_flight, &mut results);
        }

        Ok(results)
    }
}

/// Attempt one item until it succeeds, retries run out, the failure is not
/// transient, or the run is cancelled. A final failure hands the item back.
async fn attempt<I, O, F, Fut>(
    item: I,
    op: &F,
    max_retries: u32,
    cancel: &CancellationToken,
) -> std::result::Result<O, (I, NexusError)>
where
    I: Clone,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(item.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_transient() && attempt <= max_retries && !cancel.is_cancelled() => {
                debug!(attempt, error = %e, "work unit failed; retrying");
            }
            Err(e) => return Err((item, e)),
        }
    }
}
