//! HTTP client for the orchestrator API.
//!
//! Every command is a `GET <endpoint>?command=<name>&response=json&...`
//! and every answer is wrapped as `{"<lowercased name>response": {...}}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::orchestrator::{JobId, JobResultResponse, Orchestrator, Params};
use crate::resource::ResourceKind;

const QUERY_JOB_COMMAND: &str = "queryAsyncJobResult";

/// [`Orchestrator`] over the orchestrator's HTTP API.
#[derive(Clone)]
pub struct HttpOrchestrator {
    client: Client,
    endpoint: String,
    session_key: Option<String>,
}

impl HttpOrchestrator {
    pub fn new(config: &ConsoleConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            session_key: config.session_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one command and return the unwrapped response object.
    async fn command(&self, name: &str, params: &Params) -> Result<Value> {
        let mut query: Vec<(&str, &str)> = vec![("command", name), ("response", "json")];
        query.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(key) = &self.session_key {
            query.push(("sessionkey", key.as_str()));
        }

        debug!(command = %name, "Sending command");
        let response = self.client.get(&self.endpoint).query(&query).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| envelope_error_text(&body))
                .unwrap_or_else(|| text.trim().to_string());
            return Err(ConsoleError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = serde_json::from_str(&text)?;
        unwrap_envelope(name, body)
    }
}

/// Strip the `<command>response` wrapper.
pub fn unwrap_envelope(command: &str, body: Value) -> Result<Value> {
    let key = format!("{}response", command.to_ascii_lowercase());
    let Value::Object(mut map) = body else {
        return Err(ConsoleError::MalformedResponse(format!(
            "{} response is not an object",
            command
        )));
    };

    if let Some(inner) = map.remove(&key) {
        return Ok(inner);
    }

    // Some commands answer under a differently spelled key.
    if map.len() == 1 {
        if let Some((k, inner)) = map.into_iter().next() {
            if k.ends_with("response") {
                return Ok(inner);
            }
        }
    }

    Err(ConsoleError::MalformedResponse(format!(
        "{} response has no '{}' envelope",
        command, key
    )))
}

/// `errortext` from a `{"<x>response": {"errorcode": .., "errortext": ..}}` body.
fn envelope_error_text(body: &Value) -> Option<String> {
    body.as_object()?
        .values()
        .find_map(|inner| inner.get("errortext"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Item array of a list response. An absent key means nothing matched.
pub fn list_items(kind: ResourceKind, inner: Value) -> Result<Vec<Value>> {
    match inner.get(kind.item_key()) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(ConsoleError::MalformedResponse(format!(
            "'{}' in {} is not a list",
            kind.item_key(),
            kind.list_command()
        ))),
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn submit_operation(&self, name: &str, params: &Params) -> Result<JobId> {
        let inner = self.command(name, params).await?;
        inner
            .get("jobid")
            .and_then(Value::as_str)
            .map(JobId::from)
            .ok_or_else(|| ConsoleError::MalformedResponse(format!("{} returned no jobid", name)))
    }

    async fn query_job_result(&self, job_id: &JobId) -> Result<JobResultResponse> {
        let mut params = Params::new();
        params.insert("jobid".to_string(), job_id.to_string());
        let inner = self.command(QUERY_JOB_COMMAND, &params).await?;
        Ok(serde_json::from_value(inner)?)
    }

    async fn list_resource(&self, kind: ResourceKind, filters: &Params) -> Result<Vec<Value>> {
        let inner = self.command(kind.list_command(), filters).await?;
        list_items(kind, inner)
    }

    async fn execute(&self, name: &str, params: &Params) -> Result<Value> {
        self.command(name, params).await
    }
}
