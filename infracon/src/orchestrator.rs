//! Orchestrator trait definitions.
//!
//! The remote orchestrator owns all persistent state. The console only
//! submits operations, queries job results and lists resources through
//! this trait, so chains and pollers can run against any transport.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::resource::ResourceKind;

/// Command parameters. Ordered so request URLs are deterministic.
pub type Params = BTreeMap<String, String>;

/// Build [`Params`] from string pairs.
pub fn params<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Params
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Identifier of an asynchronous job tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Raw answer to a job status query.
///
/// `jobstatus` is 0 while pending, 1 on success and 2 on failure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobResultResponse {
    #[serde(default)]
    pub jobid: Option<String>,
    pub jobstatus: i64,
    #[serde(default)]
    pub jobresult: Option<Value>,
    #[serde(default)]
    pub errortext: Option<String>,
}

impl JobResultResponse {
    pub fn pending() -> Self {
        Self {
            jobstatus: 0,
            ..Default::default()
        }
    }

    pub fn succeeded(result: Value) -> Self {
        Self {
            jobstatus: 1,
            jobresult: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error_text: &str) -> Self {
        Self {
            jobstatus: 2,
            jobresult: Some(serde_json::json!({ "errortext": error_text })),
            ..Default::default()
        }
    }

    /// Failure text, read from the result envelope first, then the top level.
    pub fn error_text(&self) -> Option<&str> {
        self.jobresult
            .as_ref()
            .and_then(|r| r.get("errortext"))
            .and_then(Value::as_str)
            .or(self.errortext.as_deref())
    }
}

/// The narrow interface through which the console reaches the orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submit a long-running operation and return its job id.
    async fn submit_operation(&self, name: &str, params: &Params) -> Result<JobId>;

    /// Query the current status of a job.
    async fn query_job_result(&self, job_id: &JobId) -> Result<JobResultResponse>;

    /// List resources of one kind.
    async fn list_resource(&self, kind: ResourceKind, filters: &Params) -> Result<Vec<Value>>;

    /// Run a synchronous command and return its response object.
    async fn execute(&self, name: &str, params: &Params) -> Result<Value>;
}
