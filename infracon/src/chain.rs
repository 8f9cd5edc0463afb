//! Orchestration chains - ordered, dependent steps with abort-on-failure.
//!
//! A chain runs its steps strictly in order. A step either yields a value
//! right away, hands back a job that must finish first, or skips itself.
//! Each step's output lands in the [`ChainContext`] under its output key so
//! later steps can read it. The first failing step aborts the chain; steps
//! that already ran are not rolled back.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{ChainError, ConsoleError, Result};
use crate::job::{JobHandle, JobPoller};
use crate::orchestrator::{Orchestrator, Params};

/// Capacity of the chain event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Context
// =============================================================================

/// Values threaded from one step to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChainContext {
    values: BTreeMap<String, Value>,
}

impl ChainContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// A string value stored directly under `key`.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ConsoleError::MissingContext(key.to_string()))
    }

    /// A string field of the object stored under `key`, e.g. the `id` of a
    /// resource created by an earlier step.
    pub fn require_field(&self, key: &str, field: &str) -> Result<&str> {
        self.values
            .get(key)
            .and_then(|v| v.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConsoleError::MissingContext(format!("{}.{}", key, field)))
    }

    /// Like [`require_field`](Self::require_field) but absence is not an error.
    pub fn field(&self, key: &str, field: &str) -> Option<&str> {
        self.require_field(key, field).ok()
    }
}

// =============================================================================
// Steps
// =============================================================================

/// What a step produced.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step finished synchronously.
    Value(Value),
    /// The step submitted a job; the chain waits for it before moving on.
    Job(JobHandle),
    /// The step decided it has nothing to do.
    Skip(String),
}

/// One unit of work in a chain.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Context key for this step's output. Defaults to the step name.
    fn output_key(&self) -> &str {
        self.name()
    }

    async fn run(&self, ctx: &ChainContext) -> Result<StepOutcome>;
}

/// A step backed by an async closure over a snapshot of the context.
pub struct FnStep<F> {
    name: String,
    output_key: Option<String>,
    f: F,
}

impl<F> FnStep<F> {
    /// Store this step's output under `key` instead of the step name.
    pub fn output(mut self, key: &str) -> Self {
        self.output_key = Some(key.to_string());
        self
    }
}

/// Build a [`FnStep`].
pub fn step<F, Fut>(name: &str, f: F) -> FnStep<F>
where
    F: Fn(ChainContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutcome>> + Send,
{
    FnStep {
        name: name.to_string(),
        output_key: None,
        f,
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(ChainContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepOutcome>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or(&self.name)
    }

    async fn run(&self, ctx: &ChainContext) -> Result<StepOutcome> {
        (self.f)(ctx.clone()).await
    }
}

/// Submit `operation` and hand its job back to the chain.
pub async fn submit_job(
    orchestrator: &dyn Orchestrator,
    operation: &str,
    params: &Params,
    result_key: Option<&str>,
) -> Result<StepOutcome> {
    let job_id = orchestrator.submit_operation(operation, params).await?;
    Ok(StepOutcome::Job(JobHandle::new(job_id, operation, result_key)))
}

// =============================================================================
// Chain
// =============================================================================

/// An ordered list of steps plus the initial context.
pub struct Chain {
    name: String,
    steps: Vec<Box<dyn Step>>,
    context: ChainContext,
    provider_network: Option<String>,
}

impl Chain {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
            context: ChainContext::new(),
            provider_network: None,
        }
    }

    /// Append a step.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Seed the context before the first step runs.
    pub fn with_context(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key, value);
        self
    }

    /// Mark the chain as changing the providers of a physical network.
    pub fn mutates_providers(mut self, physical_network_id: &str) -> Self {
        self.provider_network = Some(physical_network_id.to_string());
        self
    }

    pub fn provider_network(&self) -> Option<&str> {
        self.provider_network.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

// =============================================================================
// Events and Reports
// =============================================================================

/// Progress of a running chain, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Started {
        run_id: Uuid,
        chain: String,
        steps: usize,
    },
    StepStarted {
        run_id: Uuid,
        index: usize,
        step: String,
    },
    StepCompleted {
        run_id: Uuid,
        index: usize,
        step: String,
        job_id: Option<String>,
    },
    StepSkipped {
        run_id: Uuid,
        index: usize,
        step: String,
        reason: String,
    },
    StepFailed {
        run_id: Uuid,
        index: usize,
        step: String,
        reason: String,
    },
    Finished {
        run_id: Uuid,
        chain: String,
        success: bool,
    },
}

impl ChainEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            ChainEvent::Started { run_id, .. }
            | ChainEvent::StepStarted { run_id, .. }
            | ChainEvent::StepCompleted { run_id, .. }
            | ChainEvent::StepSkipped { run_id, .. }
            | ChainEvent::StepFailed { run_id, .. }
            | ChainEvent::Finished { run_id, .. } => *run_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub job_id: Option<String>,
}

/// Outcome of a chain that ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub run_id: Uuid,
    pub chain: String,
    pub steps: Vec<StepRecord>,
    /// Output of the last step that produced one.
    pub output: Value,
    pub context: ChainContext,
    pub started_at: String,
    pub finished_at: String,
}

impl ChainReport {
    pub fn skipped(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Skipped(_)))
            .map(|s| s.name.as_str())
            .collect()
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Drives chains, awaiting job-backed steps through the [`JobPoller`].
pub struct ChainRunner {
    poller: JobPoller,
    events: broadcast::Sender<ChainEvent>,
}

impl ChainRunner {
    pub fn new(poller: JobPoller) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { poller, events }
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// Subscribe to progress events of every chain this runner executes.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ChainEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run `chain` to completion or to its first failure.
    pub async fn run(
        &self,
        chain: Chain,
        cancel: &CancellationToken,
    ) -> std::result::Result<ChainReport, ChainError> {
        let Chain {
            name,
            steps,
            mut context,
            ..
        } = chain;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now().to_rfc3339();

        info!(run_id = %run_id, chain = %name, steps = steps.len(), "Starting chain");
        self.emit(ChainEvent::Started {
            run_id,
            chain: name.clone(),
            steps: steps.len(),
        });

        let mut records = Vec::with_capacity(steps.len());
        let mut output = Value::Null;

        for (index, step) in steps.iter().enumerate() {
            let step_name = step.name().to_string();

            if cancel.is_cancelled() {
                return Err(self.abort(run_id, &name, index, &step_name, ConsoleError::Cancelled));
            }

            debug!(run_id = %run_id, chain = %name, index, step = %step_name, "Running step");
            self.emit(ChainEvent::StepStarted {
                run_id,
                index,
                step: step_name.clone(),
            });

            let outcome = match step.run(&context).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort(run_id, &name, index, &step_name, e)),
            };

            let (value, job_id) = match outcome {
                StepOutcome::Value(value) => (value, None),
                StepOutcome::Job(mut handle) => {
                    let job_id = handle.job_id().to_string();
                    match self.poller.wait(&mut handle, cancel).await {
                        Ok(value) => (value, Some(job_id)),
                        Err(e) => return Err(self.abort(run_id, &name, index, &step_name, e)),
                    }
                }
                StepOutcome::Skip(reason) => {
                    info!(run_id = %run_id, chain = %name, step = %step_name, reason = %reason, "Skipping step");
                    self.emit(ChainEvent::StepSkipped {
                        run_id,
                        index,
                        step: step_name.clone(),
                        reason: reason.clone(),
                    });
                    records.push(StepRecord {
                        index,
                        name: step_name,
                        status: StepStatus::Skipped(reason),
                        job_id: None,
                    });
                    continue;
                }
            };

            context.insert(step.output_key(), value.clone());
            output = value;
            self.emit(ChainEvent::StepCompleted {
                run_id,
                index,
                step: step_name.clone(),
                job_id: job_id.clone(),
            });
            records.push(StepRecord {
                index,
                name: step_name,
                status: StepStatus::Completed,
                job_id,
            });
        }

        info!(run_id = %run_id, chain = %name, "Chain finished");
        self.emit(ChainEvent::Finished {
            run_id,
            chain: name.clone(),
            success: true,
        });

        Ok(ChainReport {
            run_id,
            chain: name,
            steps: records,
            output,
            context,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    fn abort(
        &self,
        run_id: Uuid,
        chain: &str,
        index: usize,
        step: &str,
        source: ConsoleError,
    ) -> ChainError {
        error!(run_id = %run_id, chain = %chain, index, step = %step, error = %source, "Chain aborted");
        self.emit(ChainEvent::StepFailed {
            run_id,
            index,
            step: step.to_string(),
            reason: source.reason(),
        });
        self.emit(ChainEvent::Finished {
            run_id,
            chain: chain.to_string(),
            success: false,
        });
        ChainError {
            chain: chain.to_string(),
            step: step.to_string(),
            index,
            source,
        }
    }
}
