/// Job worker
///
/// Pulls jobs from a [`Broker`] and runs up to `concurrency` of them at once.
/// Every execution goes through the same metrics hooks and, on failure, the
/// handler's global error hook.
use super::{Broker, Job, Task};
use crate::config::WorkerSettings;
use crate::error::{AppError, AppResult, PipelineError, PipelineResult};
use crate::metrics;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Dispatch target for the worker
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one task
    async fn handle(&self, task: &Task) -> PipelineResult<()>;

    /// Global error handler, invoked for every failed task
    async fn on_failure(&self, task: &Task, error: &PipelineError);
}

pub struct Worker<H: JobHandler> {
    handler: Arc<H>,
    broker: Arc<dyn Broker>,
    concurrency: usize,
    idle_poll: Duration,
    drain_timeout: Duration,
}

impl<H: JobHandler> Worker<H> {
    pub fn new(handler: Arc<H>, broker: Arc<dyn Broker>, settings: &WorkerSettings) -> Self {
        Self {
            handler,
            broker,
            concurrency: settings.concurrency.max(1),
            idle_poll: settings.idle_poll(),
            drain_timeout: settings.drain_timeout(),
        }
    }

    /// Run until `shutdown` is cancelled
    ///
    /// On shutdown no new jobs are taken; in-flight jobs get `drain_timeout`
    /// to finish and are then detached rather than aborted.
    pub async fn run(&self, shutdown: CancellationToken) -> AppResult<()> {
        metrics::WORKER_MAX_CONCURRENCY.set(self.concurrency as i64);
        info!(concurrency = self.concurrency, "Worker started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight: JoinSet<bool> = JoinSet::new();

        loop {
            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Job task panicked");
                }
            }

            let permit = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| AppError::Internal(format!("Worker semaphore closed: {}", e)))?,
            };

            let job = match self.broker.pop().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(self.idle_poll))
                        .await
                        .is_none()
                    {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Failed to pop job from queue");
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(self.idle_poll))
                        .await
                        .is_none()
                    {
                        break;
                    }
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            in_flight.spawn(async move {
                let _permit = permit;
                execute(handler.as_ref(), job).await
            });
        }

        info!(in_flight = in_flight.len(), "Shutdown requested, draining in-flight jobs");

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(finished) = in_flight.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Job task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "Drain timeout elapsed, detaching remaining jobs"
            );
            in_flight.detach_all();
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Run due jobs one at a time until the queue has nothing ready
    ///
    /// Returns how many jobs ran. Delayed jobs that are not yet due are left
    /// in the queue.
    pub async fn run_until_idle(&self) -> AppResult<usize> {
        let mut executed = 0;
        while let Some(job) = self.broker.pop().await? {
            execute(self.handler.as_ref(), job).await;
            executed += 1;
        }
        Ok(executed)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Execute one job with metrics and error handling; returns whether it succeeded
///
/// A panicking handler counts as a fatal failure.
pub async fn execute<H: JobHandler + ?Sized>(handler: &H, job: Job) -> bool {
    let name = job.task.kind().name();
    let span = info_span!("job", task = name, id = %job.id);

    async move {
        metrics::record_job_started(name);
        let started = Instant::now();

        let result = match AssertUnwindSafe(handler.handle(&job.task)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PipelineError::Fatal(AppError::Internal(format!(
                "Job panicked: {}",
                panic_message(panic.as_ref())
            )))),
        };

        let class = result.as_ref().err().map(PipelineError::class);
        metrics::record_job_finished(name, class, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!("Job completed");
                true
            }
            Err(e) => {
                handler.on_failure(&job.task, &e).await;
                false
            }
        }
    }
    .instrument(span)
    .await
}
