//! Requested actions: permission check, chain run and the recomputed action set.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ScriptedOrchestrator;
use infracon::chain::{Chain, ChainContext, step, submit_job};
use infracon::orchestrator::{JobResultResponse, Orchestrator, params};
use infracon::{
    Action, ActionError, ActionSet, Console, ConsoleError, FilterContext, ResourceKind,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn hosts() -> Vec<serde_json::Value> {
    vec![
        json!({"id": "h-1", "resourcestate": "Enabled", "state": "Up"}),
        json!({"id": "h-2", "resourcestate": "Maintenance", "state": "Up"}),
    ]
}

/// One job-backed step acting on host `id`.
fn host_chain(orchestrator: Arc<dyn Orchestrator>, command: &'static str, id: &str) -> Chain {
    let id = id.to_string();
    Chain::new(command).step(
        step(command, move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let id = id.clone();
            async move {
                submit_job(orchestrator.as_ref(), command, &params([("id", id.as_str())]), Some("host"))
                    .await
            }
        })
        .output("host"),
    )
}

#[tokio::test]
async fn test_unoffered_action_is_refused() {
    let orchestrator = ScriptedOrchestrator::new()
        .resources(ResourceKind::Host, hosts())
        .into_arc();
    let console = Console::new(orchestrator.clone(), Duration::from_millis(2));

    let chain = host_chain(console.orchestrator(), "cancelHostMaintenance", "h-1");
    let err = console
        .run_action(
            ResourceKind::Host,
            "h-1",
            Action::CancelMaintenanceMode,
            chain,
            &FilterContext::admin(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ActionError::Console(ConsoleError::InvalidStateTransition {
            kind: "host".to_string(),
            id: "h-1".to_string(),
            action: "cancelMaintenanceMode".to_string(),
        })
    );
    assert_eq!(orchestrator.operations(), vec!["listHosts"]);
}

#[tokio::test]
async fn test_actions_recomputed_from_chain_output() {
    let orchestrator = ScriptedOrchestrator::new()
        .resources(ResourceKind::Host, hosts())
        .job(
            "cancelHostMaintenance",
            vec![
                JobResultResponse::pending(),
                JobResultResponse::succeeded(json!({
                    "host": {"id": "h-2", "resourcestate": "Enabled", "state": "Up"}
                })),
            ],
        )
        .into_arc();
    let console = Console::new(orchestrator.clone(), Duration::from_millis(2));

    let chain = host_chain(console.orchestrator(), "cancelHostMaintenance", "h-2");
    let actions = console
        .run_action(
            ResourceKind::Host,
            "h-2",
            Action::CancelMaintenanceMode,
            chain,
            &FilterContext::admin(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        actions,
        ActionSet::from([
            Action::Edit,
            Action::EnableMaintenanceMode,
            Action::ForceReconnect,
            Action::Dedicate,
        ])
    );
    // The new state came from the job result, no second lookup.
    assert_eq!(orchestrator.operations(), vec!["listHosts", "cancelHostMaintenance"]);
}

#[tokio::test]
async fn test_actions_refetched_when_output_is_not_the_resource() {
    let orchestrator = ScriptedOrchestrator::new()
        .resources(ResourceKind::Host, hosts())
        .job(
            "prepareHostForMaintenance",
            vec![JobResultResponse::succeeded(json!({"host": {"success": true}}))],
        )
        .into_arc();
    let console = Console::new(orchestrator.clone(), Duration::from_millis(2));

    let chain = host_chain(console.orchestrator(), "prepareHostForMaintenance", "h-1");
    let actions = console
        .run_action(
            ResourceKind::Host,
            "h-1",
            Action::EnableMaintenanceMode,
            chain,
            &FilterContext::admin(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        orchestrator.operations(),
        vec!["listHosts", "prepareHostForMaintenance", "listHosts"]
    );
    assert_eq!(
        actions,
        ActionSet::from([
            Action::Edit,
            Action::EnableMaintenanceMode,
            Action::ForceReconnect,
            Action::Dedicate,
        ])
    );
}

#[tokio::test]
async fn test_failed_action_chain_is_reported() {
    let orchestrator = ScriptedOrchestrator::new()
        .resources(ResourceKind::Host, hosts())
        .job(
            "prepareHostForMaintenance",
            vec![JobResultResponse::failed("Host h-1 has running system VMs")],
        )
        .into_arc();
    let console = Console::new(orchestrator.clone(), Duration::from_millis(2));

    let chain = host_chain(console.orchestrator(), "prepareHostForMaintenance", "h-1");
    let err = console
        .run_action(
            ResourceKind::Host,
            "h-1",
            Action::EnableMaintenanceMode,
            chain,
            &FilterContext::admin(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    let ActionError::Chain(err) = err else {
        panic!("expected a chain failure, got {err:?}");
    };
    assert_eq!(err.step, "prepareHostForMaintenance");
    assert_eq!(err.reason(), "Host h-1 has running system VMs");
}
