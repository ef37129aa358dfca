//! Multi-request scheduler
//!
//! Runs many exchanges concurrently on the calling task with at most
//! `max_concurrency` in flight. Every exchange is registered in `all` when
//! submitted and in `active` while its future is being driven, so
//! `active ⊆ all` and `|active| <= max_concurrency` at every point.
//!
//! The drive loop polls every in-flight exchange, waits a bounded interval
//! when none is ready, and hands each finished exchange to a
//! [`CompletionHandler`], which accepts it, returns a replacement to retry,
//! or fails the run. After the first failure the backlog is dropped, the
//! exchanges still in flight are drained, and the failure is returned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;

use bfs_core::{Error, Result, RetryConfig};

use crate::context::{HandleId, RequestContext, WorkKey};
use crate::transport::Transport;

/// Upper bound on one readiness wait before the loop re-checks its state
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do with a finished exchange
#[derive(Debug)]
pub enum Disposition {
    /// Done with this unit of work
    Accept,
    /// Resubmit this fresh exchange in place of the finished one
    RetryWith(RequestContext),
    /// Stop the run with this error
    Fail(Error),
}

/// Decides the fate of every finished exchange
///
/// A retryable failure whose work key already spent the retry budget never
/// reaches the handler; the run fails with `RetriesExhausted` instead.
#[cfg_attr(test, mockall::automock)]
pub trait CompletionHandler: Send {
    fn on_finished(&mut self, exchange: RequestContext, outcome: Result<()>) -> Disposition;
}

impl<F> CompletionHandler for F
where
    F: FnMut(RequestContext, Result<()>) -> Disposition + Send,
{
    fn on_finished(&mut self, exchange: RequestContext, outcome: Result<()>) -> Disposition {
        self(exchange, outcome)
    }
}

/// Counters for one scheduler instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: usize,
    pub completed: usize,
    pub retried: usize,
    pub peak_active: usize,
}

struct Queued {
    exchange: RequestContext,
    key: WorkKey,
    delay: Duration,
}

type InFlight = FuturesUnordered<BoxFuture<'static, (RequestContext, Result<()>)>>;

pub struct Scheduler {
    transport: Arc<dyn Transport>,
    max_concurrency: usize,
    retry: RetryConfig,
    poll_interval: Duration,
    all: HashMap<HandleId, WorkKey>,
    active: HashMap<HandleId, WorkKey>,
    active_keys: HashSet<WorkKey>,
    backlog: VecDeque<Queued>,
    attempts: HashMap<WorkKey, u32>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(transport: Arc<dyn Transport>, max_concurrency: usize, retry: RetryConfig) -> Self {
        Self {
            transport,
            max_concurrency: max_concurrency.max(1),
            retry,
            poll_interval: DEFAULT_POLL_INTERVAL,
            all: HashMap::new(),
            active: HashMap::new(),
            active_keys: HashSet::new(),
            backlog: VecDeque::new(),
            attempts: HashMap::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Register an exchange; it is dispatched by [`run`](Self::run) once a slot is free.
    pub fn submit(&mut self, exchange: RequestContext) {
        self.enqueue(exchange, Duration::ZERO, false);
        self.stats.submitted += 1;
    }

    fn enqueue(&mut self, exchange: RequestContext, delay: Duration, front: bool) {
        let key = exchange.work_key();
        self.all.insert(exchange.handle(), key.clone());
        let queued = Queued {
            exchange,
            key,
            delay,
        };
        if front {
            self.backlog.push_front(queued);
        } else {
            self.backlog.push_back(queued);
        }
    }

    pub fn registered(&self) -> usize {
        self.all.len()
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Forget every registered exchange without running it
    pub fn clear(&mut self) {
        self.backlog.clear();
        self.all.clear();
        self.attempts.clear();
    }

    /// Promote queued exchanges while slots are free, skipping work keys already active.
    fn promote(&mut self, in_flight: &mut InFlight) {
        while self.active.len() < self.max_concurrency {
            let Some(index) = self
                .backlog
                .iter()
                .position(|q| !self.active_keys.contains(&q.key))
            else {
                break;
            };
            let Some(Queued {
                mut exchange,
                key,
                delay,
            }) = self.backlog.remove(index)
            else {
                break;
            };

            self.active.insert(exchange.handle(), key.clone());
            self.active_keys.insert(key);
            self.stats.peak_active = self.stats.peak_active.max(self.active.len());

            let transport = self.transport.clone();
            in_flight.push(Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let performed = transport.perform(&mut exchange).await;
                (exchange, performed)
            }));
        }
        self.check_invariants();
    }

    fn retire(&mut self, handle: HandleId) -> Option<WorkKey> {
        let key = self.active.remove(&handle)?;
        self.active_keys.remove(&key);
        self.all.remove(&handle);
        self.check_invariants();
        Some(key)
    }

    fn drop_backlog(&mut self) {
        for queued in self.backlog.drain(..) {
            self.all.remove(&queued.exchange.handle());
        }
    }

    fn check_invariants(&self) {
        debug_assert!(self.active.len() <= self.max_concurrency);
        debug_assert!(self.active.keys().all(|h| self.all.contains_key(h)));
        debug_assert_eq!(self.active.len(), self.active_keys.len());
    }

    /// Drive every registered exchange to a final disposition.
    ///
    /// Returns the first fatal error, or `Ok` once every unit of work was
    /// accepted. Ends with both registries empty.
    pub async fn run(&mut self, handler: &mut dyn CompletionHandler) -> Result<()> {
        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut first_error: Option<Error> = None;

        loop {
            if first_error.is_none() {
                self.promote(&mut in_flight);
            }
            if in_flight.is_empty() {
                break;
            }

            let (exchange, performed) =
                match tokio::time::timeout(self.poll_interval, in_flight.next()).await {
                    Ok(Some(finished)) => finished,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::trace!(
                            active = self.active.len(),
                            backlog = self.backlog.len(),
                            "Waiting for exchanges"
                        );
                        continue;
                    }
                };

            let Some(key) = self.retire(exchange.handle()) else {
                continue;
            };
            self.stats.completed += 1;

            if first_error.is_some() {
                tracing::debug!(work = %key, "Drained exchange after failure");
                continue;
            }

            let attempt = self.attempts.get(&key).copied().unwrap_or(1);
            let outcome = match performed.and_then(|()| exchange.outcome()) {
                Err(last) if last.is_retryable() && attempt >= self.retry.max_attempts => {
                    tracing::warn!(work = %key, attempts = attempt, error = %last, "Retry budget exhausted");
                    first_error = Some(Error::RetriesExhausted {
                        path: key.to_string(),
                        attempts: attempt,
                        last: Box::new(last),
                    });
                    self.drop_backlog();
                    continue;
                }
                outcome => outcome,
            };

            match handler.on_finished(exchange, outcome) {
                Disposition::Accept => {
                    self.attempts.remove(&key);
                }
                Disposition::RetryWith(next) => {
                    if attempt >= self.retry.max_attempts {
                        first_error = Some(Error::RetriesExhausted {
                            path: key.to_string(),
                            attempts: attempt,
                            last: Box::new(Error::General("retry requested with no budget left".into())),
                        });
                    } else {
                        let delay = self.retry.backoff(attempt);
                        tracing::debug!(
                            work = %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Resubmitting exchange"
                        );
                        self.attempts.insert(key, attempt + 1);
                        self.stats.retried += 1;
                        self.enqueue(next, delay, true);
                    }
                }
                Disposition::Fail(error) => {
                    tracing::debug!(work = %key, error = %error, "Exchange failed");
                    first_error = Some(error);
                }
            }

            if first_error.is_some() {
                self.drop_backlog();
            }
        }

        debug_assert!(self.active.is_empty());
        self.attempts.clear();
        match first_error {
            Some(error) => Err(error),
            None => {
                debug_assert!(self.all.is_empty());
                Ok(())
            }
        }
    }
}

/// Handler used for independent exchanges: retry what is retryable, fail on the rest
pub fn retry_retryable(exchange: RequestContext, outcome: Result<()>) -> Disposition {
    match outcome {
        Ok(()) => Disposition::Accept,
        Err(e) if e.is_retryable() => Disposition::RetryWith(exchange.replacement()),
        Err(e) => Disposition::Fail(e),
    }
}
