//! Job poller - drives an asynchronous orchestrator job to its terminal state.
//!
//! A job is Pending (0) until the orchestrator reports Succeeded (1) or
//! Failed (2). Terminal states are final: once a handle has observed one,
//! further polls return it without contacting the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};
use crate::orchestrator::{JobId, JobResultResponse, Orchestrator, Params};

const JOB_PENDING: i64 = 0;
const JOB_SUCCEEDED: i64 = 1;
const JOB_FAILED: i64 = 2;

/// Observed status of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    /// Carries the kind-specific payload extracted from the result envelope.
    Succeeded(Value),
    /// Carries the orchestrator's error text.
    Failed(String),
}

impl JobStatus {
    /// Interpret a raw status response. An unknown status code is an error,
    /// never a success.
    pub fn from_response(response: &JobResultResponse, result_key: Option<&str>) -> Result<Self> {
        match response.jobstatus {
            JOB_PENDING => Ok(JobStatus::Pending),
            JOB_SUCCEEDED => {
                let result = response.jobresult.clone().unwrap_or(Value::Null);
                match result_key {
                    None => Ok(JobStatus::Succeeded(result)),
                    Some(key) => result
                        .get(key)
                        .cloned()
                        .map(JobStatus::Succeeded)
                        .ok_or_else(|| {
                            ConsoleError::MalformedResponse(format!(
                                "job result has no '{}' entry",
                                key
                            ))
                        }),
                }
            }
            JOB_FAILED => Ok(JobStatus::Failed(
                response
                    .error_text()
                    .unwrap_or("job failed without an error message")
                    .to_string(),
            )),
            other => Err(ConsoleError::MalformedResponse(format!(
                "unknown job status {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// A submitted job, tracked until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: JobId,
    operation: String,
    /// Key of the payload inside the result envelope, e.g. `networkserviceprovider`.
    result_key: Option<String>,
    /// Terminal outcome. A succeeded job whose payload could not be
    /// extracted is terminal too, with the extraction error.
    terminal: Option<Result<JobStatus>>,
}

impl JobHandle {
    pub fn new(job_id: JobId, operation: &str, result_key: Option<&str>) -> Self {
        Self {
            job_id,
            operation: operation.to_string(),
            result_key: result_key.map(str::to_string),
            terminal: None,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn result_key(&self) -> Option<&str> {
        self.result_key.as_deref()
    }

    /// The terminal status, once observed.
    pub fn terminal(&self) -> Option<&JobStatus> {
        self.terminal.as_ref().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Whether the orchestrator reported a terminal status for this job.
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

/// Submits operations and polls their jobs on a fixed interval.
#[derive(Clone)]
pub struct JobPoller {
    orchestrator: Arc<dyn Orchestrator>,
    interval: Duration,
}

impl JobPoller {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Submit `operation` and return a handle for polling its job.
    pub async fn submit(
        &self,
        operation: &str,
        params: &Params,
        result_key: Option<&str>,
    ) -> Result<JobHandle> {
        let job_id = self.orchestrator.submit_operation(operation, params).await?;
        debug!(job_id = %job_id, operation = %operation, "Submitted job");
        Ok(JobHandle::new(job_id, operation, result_key))
    }

    /// Query the job once. A handle that already saw a terminal status
    /// returns it again without a query.
    pub async fn poll(&self, handle: &mut JobHandle) -> Result<JobStatus> {
        if let Some(outcome) = &handle.terminal {
            return outcome.clone();
        }

        let response = self.orchestrator.query_job_result(&handle.job_id).await?;
        let outcome = JobStatus::from_response(&response, handle.result_key());

        match &outcome {
            Ok(JobStatus::Pending) => {
                debug!(job_id = %handle.job_id, operation = %handle.operation, "Job pending");
                return outcome;
            }
            Ok(JobStatus::Succeeded(_)) => {
                info!(job_id = %handle.job_id, operation = %handle.operation, "Job succeeded");
            }
            Ok(JobStatus::Failed(reason)) => {
                warn!(
                    job_id = %handle.job_id,
                    operation = %handle.operation,
                    error = %reason,
                    "Job failed"
                );
            }
            Err(e) if response.jobstatus == JOB_SUCCEEDED => {
                warn!(
                    job_id = %handle.job_id,
                    operation = %handle.operation,
                    error = %e,
                    "Job succeeded with an unexpected result"
                );
            }
            // Unknown status code, the job may still finish.
            Err(_) => return outcome,
        }

        handle.terminal = Some(outcome.clone());
        outcome
    }

    /// Poll every interval until the job is terminal or `cancel` fires.
    ///
    /// The ticker is dropped as soon as a terminal status or cancellation is
    /// seen, so no further queries are issued for this job. Cancellation also
    /// abandons a query that is still in flight.
    pub async fn wait(&self, handle: &mut JobHandle, cancel: &CancellationToken) -> Result<Value> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let job_id = handle.job_id.clone();
        let operation = handle.operation.clone();

        loop {
            let polled = if handle.is_terminal() {
                self.poll(handle).await
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(job_id = %job_id, operation = %operation, "Stopped polling, cancelled");
                        return Err(ConsoleError::Cancelled);
                    }
                    polled = async {
                        ticker.tick().await;
                        self.poll(handle).await
                    } => polled,
                }
            };

            match polled? {
                JobStatus::Pending => continue,
                JobStatus::Succeeded(payload) => return Ok(payload),
                JobStatus::Failed(message) => {
                    return Err(ConsoleError::JobFailure {
                        job_id: job_id.to_string(),
                        message,
                    });
                }
            }
        }
    }

    /// Submit `operation` and wait for its job to finish.
    pub async fn submit_and_wait(
        &self,
        operation: &str,
        params: &Params,
        result_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut handle = self.submit(operation, params, result_key).await?;
        self.wait(&mut handle, cancel).await
    }
}
