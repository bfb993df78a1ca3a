/// Typed task submission
use super::{Broker, Job, Task};
use crate::error::{AppError, AppResult};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobClient {
    broker: Arc<dyn Broker>,
}

impl JobClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Enqueue a task for immediate execution
    pub async fn send(&self, task: Task) -> AppResult<Uuid> {
        self.enqueue(task, None).await
    }

    /// Enqueue a task to run at `at`
    pub async fn send_at(&self, task: Task, at: DateTime<Utc>) -> AppResult<Uuid> {
        self.enqueue(task, Some(at)).await
    }

    /// Enqueue a task to run after `delay`
    pub async fn send_after(&self, task: Task, delay: Duration) -> AppResult<Uuid> {
        if delay.is_zero() {
            return self.send(task).await;
        }
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| AppError::Validation(format!("Invalid job delay: {}", e)))?;
        self.send_at(task, Utc::now() + delay).await
    }

    async fn enqueue(&self, task: Task, eta: Option<DateTime<Utc>>) -> AppResult<Uuid> {
        task.validate()?;

        let name = task.kind().name();
        let job = Job::new(task);
        let id = job.id;
        self.broker.push(job, eta).await?;

        metrics::record_job_enqueued(name);
        debug!(task = name, job_id = %id, eta = ?eta, "Job enqueued");
        Ok(id)
    }
}
