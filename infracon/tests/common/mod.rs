//! Shared test utilities for infracon integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use infracon::orchestrator::{JobId, JobResultResponse, Orchestrator, Params};
use infracon::{ConsoleConfig, ConsoleError, ResourceKind, Result};
use serde_json::Value;
use tokio::net::TcpListener;

/// Allocate an available port for testing.
pub fn allocate_port() -> u16 {
    portpicker::pick_unused_port().expect("No available port")
}

// =============================================================================
// Scripted orchestrator
// =============================================================================

/// One recorded call. Listings are recorded under their list command.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: String,
    pub params: Params,
}

/// In-memory orchestrator replaying scripted answers and recording calls.
///
/// Every submission of an operation gets a fresh job id whose status
/// sequence is the one scripted for that operation. The last status of a
/// sequence repeats forever.
#[derive(Default)]
pub struct ScriptedOrchestrator {
    job_scripts: HashMap<String, Vec<JobResultResponse>>,
    commands: HashMap<String, std::result::Result<Value, ConsoleError>>,
    resources: HashMap<ResourceKind, Vec<Value>>,
    jobs: Mutex<HashMap<String, VecDeque<JobResultResponse>>>,
    calls: Mutex<Vec<Call>>,
    next_job: AtomicUsize,
    queries: AtomicUsize,
}

impl ScriptedOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status sequence of jobs submitted for `operation`.
    pub fn job(mut self, operation: &str, statuses: Vec<JobResultResponse>) -> Self {
        self.job_scripts.insert(operation.to_string(), statuses);
        self
    }

    /// Script the response object of a synchronous command.
    pub fn command(mut self, operation: &str, response: Value) -> Self {
        self.commands.insert(operation.to_string(), Ok(response));
        self
    }

    pub fn failing_command(mut self, operation: &str, error: ConsoleError) -> Self {
        self.commands.insert(operation.to_string(), Err(error));
        self
    }

    /// Records returned by listings of `kind`, filtered by exact field match.
    pub fn resources(mut self, kind: ResourceKind, records: Vec<Value>) -> Self {
        self.resources.insert(kind, records);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn record(&self, operation: &str, params: &Params) {
        self.calls.lock().unwrap().push(Call {
            operation: operation.to_string(),
            params: params.clone(),
        });
    }

    /// Operation names in call order. Job queries are not included.
    pub fn operations(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.operation.clone())
            .collect()
    }

    /// Parameters of every call to `operation`.
    pub fn calls_to(&self, operation: &str) -> Vec<Params> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.params.clone())
            .collect()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Orchestrator for ScriptedOrchestrator {
    async fn submit_operation(&self, name: &str, params: &Params) -> Result<JobId> {
        self.record(name, params);
        let script = self
            .job_scripts
            .get(name)
            .ok_or_else(|| ConsoleError::Transport(format!("unexpected operation {}", name)))?;
        let id = format!("job-{}", self.next_job.fetch_add(1, Ordering::SeqCst) + 1);
        self.jobs
            .lock()
            .unwrap()
            .insert(id.clone(), script.iter().cloned().collect());
        Ok(JobId(id))
    }

    async fn query_job_result(&self, job_id: &JobId) -> Result<JobResultResponse> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let statuses = jobs
            .get_mut(job_id.as_str())
            .ok_or_else(|| ConsoleError::Transport(format!("unknown job {}", job_id)))?;
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or_else(|| ConsoleError::MalformedResponse("empty job script".to_string()))
    }

    async fn list_resource(&self, kind: ResourceKind, filters: &Params) -> Result<Vec<Value>> {
        self.record(kind.list_command(), filters);
        let records = self.resources.get(&kind).cloned().unwrap_or_default();
        Ok(records
            .into_iter()
            .filter(|record| {
                filters
                    .iter()
                    .all(|(k, v)| record.get(k).and_then(Value::as_str) == Some(v.as_str()))
            })
            .collect())
    }

    async fn execute(&self, name: &str, params: &Params) -> Result<Value> {
        self.record(name, params);
        self.commands
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(ConsoleError::Transport(format!("unexpected command {}", name))))
    }
}

// =============================================================================
// Fake HTTP API
// =============================================================================

/// Scripted answers of the fake API, keyed by command name.
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<HashMap<String, VecDeque<(u16, Value)>>>,
    requests: Mutex<Vec<HashMap<String, String>>>,
}

impl FakeApi {
    /// Queue an answer for `command`. The last queued answer repeats.
    pub fn respond(&self, command: &str, status: u16, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back((status, body));
    }

    /// Query strings received so far.
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|q| q.get("command").cloned())
            .collect()
    }
}

async fn handle_command(
    State(api): State<Arc<FakeApi>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    api.requests.lock().unwrap().push(query.clone());

    let command = query.get("command").cloned().unwrap_or_default();
    let mut responses = api.responses.lock().unwrap();
    let answer = responses.get_mut(&command).and_then(|queue| {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    });

    match answer {
        Some((status, body)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        ),
        None => (
            StatusCode::from_u16(432).unwrap(),
            Json(serde_json::json!({
                "errorresponse": {"errorcode": 432, "errortext": format!("unknown command {}", command)}
            })),
        ),
    }
}

/// Fake orchestrator API served over HTTP on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub api: Arc<FakeApi>,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let api = Arc::new(FakeApi::default());
        let router = Router::new()
            .route("/client/api", get(handle_command))
            .with_state(Arc::clone(&api));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
        let actual_addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("Server error");
        });

        Self {
            addr: actual_addr,
            api,
            shutdown_tx,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}/client/api", self.addr)
    }

    /// Config pointing at this server with a short poll interval.
    pub fn config(&self) -> ConsoleConfig {
        ConsoleConfig {
            endpoint: self.endpoint(),
            session_key: Some("test-session".to_string()),
            poll_interval_ms: 5,
            request_timeout_secs: 5,
        }
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}
