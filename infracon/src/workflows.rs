//! Chain builders for the console's multi-step provisioning workflows.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::chain::{Chain, ChainContext, StepOutcome, step, submit_job};
use crate::error::{ConsoleError, Result};
use crate::orchestrator::{Orchestrator, Params, params};
use crate::registry::{ProviderKind, ProviderRegistry};
use crate::resource::ResourceKind;

/// Context key of the provider used by a device registration.
pub const PROVIDER_KEY: &str = "provider";
/// Context key of the resource created by a provisioning chain.
pub const RESOURCE_KEY: &str = "resource";

/// Sub-payload of a response, unwrapping single-element lists
/// (`{"host": [{...}]}` as well as `{"pod": {...}}`).
fn first_item(inner: &Value, key: &str) -> Result<Value> {
    match inner.get(key) {
        Some(Value::Array(items)) => items.first().cloned().ok_or_else(|| {
            ConsoleError::MalformedResponse(format!("'{}' list is empty", key))
        }),
        Some(Value::Null) | None => Err(ConsoleError::MalformedResponse(format!(
            "response has no '{}'",
            key
        ))),
        Some(item) => Ok(item.clone()),
    }
}

/// Look up a provider by name on a physical network.
async fn find_provider(
    orchestrator: &dyn Orchestrator,
    physical_network_id: &str,
    name: &str,
) -> Result<Value> {
    let providers = orchestrator
        .list_resource(
            ResourceKind::NetworkServiceProvider,
            &params([("name", name), ("physicalnetworkid", physical_network_id)]),
        )
        .await?;
    providers.into_iter().next().ok_or_else(|| {
        ConsoleError::MalformedResponse(format!(
            "no {} provider on physical network {}",
            name, physical_network_id
        ))
    })
}

// =============================================================================
// Provider device provisioning
// =============================================================================

/// An external device to register under a provider.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub physical_network_id: String,
    pub provider: ProviderKind,
    /// Device parameters (url, credentials, ...), passed through unchanged.
    pub params: Params,
}

/// Create the provider if the physical network lacks it, then register the
/// device under it.
///
/// Whether the provider exists is decided from the registry snapshot of the
/// physical network, fetched first if the registry holds none. An existing
/// provider is seeded into the context and the create step skips itself.
pub async fn provision_device_chain(
    orchestrator: Arc<dyn Orchestrator>,
    registry: &ProviderRegistry,
    request: DeviceRequest,
) -> Result<Chain> {
    let (Some(device_command), Some(result_key)) = (
        request.provider.device_command(),
        request.provider.device_result_key(),
    ) else {
        return Err(ConsoleError::Config(format!(
            "provider {} does not take external devices",
            request.provider
        )));
    };

    let provider_name = request.provider.provider_name();
    let physnet = request.physical_network_id.clone();

    let mut chain = Chain::new(&format!("add-{}-device", provider_name.to_ascii_lowercase()))
        .mutates_providers(&physnet);

    let snapshot = match registry.snapshot(&physnet).await {
        Some(snapshot) => snapshot,
        None => registry.refresh(orchestrator.as_ref(), &physnet).await?,
    };
    if let Some(existing) = snapshot.get(provider_name).filter(|p| p.is_present()) {
        debug!(provider = %provider_name, id = %existing.id, "Provider already exists");
        chain = chain.with_context(
            PROVIDER_KEY,
            json!({
                "id": existing.id,
                "name": existing.name,
                "physicalnetworkid": existing.physical_network_id,
            }),
        );
    }

    let create_orchestrator = Arc::clone(&orchestrator);
    let create_physnet = physnet.clone();
    let chain = chain.step(
        step("create-provider", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&create_orchestrator);
            let physnet = create_physnet.clone();
            async move {
                if let Some(id) = ctx.field(PROVIDER_KEY, "id") {
                    return Ok(StepOutcome::Skip(format!(
                        "{} provider {} already exists",
                        provider_name, id
                    )));
                }
                submit_job(
                    orchestrator.as_ref(),
                    "addNetworkServiceProvider",
                    &params([("name", provider_name), ("physicalnetworkid", physnet.as_str())]),
                    Some("networkserviceprovider"),
                )
                .await
            }
        })
        .output(PROVIDER_KEY),
    );

    let device_params = request.params;
    Ok(chain.step(
        step("register-device", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let mut params = device_params.clone();
            params.insert("physicalnetworkid".to_string(), physnet.clone());
            async move {
                let provider_id = ctx.require_field(PROVIDER_KEY, "id")?;
                debug!(provider_id = %provider_id, command = %device_command, "Registering device");
                submit_job(orchestrator.as_ref(), device_command, &params, Some(result_key)).await
            }
        })
        .output("device"),
    ))
}

// =============================================================================
// Create with optional dedication
// =============================================================================

/// Resource kinds that are created then optionally dedicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placement {
    Pod,
    Cluster,
    Host,
}

impl Placement {
    pub fn create_command(&self) -> &'static str {
        match self {
            Placement::Pod => "createPod",
            Placement::Cluster => "addCluster",
            Placement::Host => "addHost",
        }
    }

    /// Key of the created resource in the create response.
    pub fn result_key(&self) -> &'static str {
        match self {
            Placement::Pod => "pod",
            Placement::Cluster => "cluster",
            Placement::Host => "host",
        }
    }

    pub fn dedicate_command(&self) -> &'static str {
        match self {
            Placement::Pod => "dedicatePod",
            Placement::Cluster => "dedicateCluster",
            Placement::Host => "dedicateHost",
        }
    }

    /// Parameter naming the resource in the dedicate command.
    pub fn id_param(&self) -> &'static str {
        match self {
            Placement::Pod => "podid",
            Placement::Cluster => "clusterid",
            Placement::Host => "hostid",
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Placement::Pod => ResourceKind::Pod,
            Placement::Cluster => ResourceKind::Cluster,
            Placement::Host => ResourceKind::Host,
        }
    }
}

/// Owner of a dedicated resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedicationRequest {
    pub domain_id: String,
    pub account: Option<String>,
}

/// Create a pod, cluster or host, then dedicate it when asked to.
///
/// The dedicate step skips itself when no dedication was requested or when
/// the create response carried no id.
pub fn provision_with_dedication(
    orchestrator: Arc<dyn Orchestrator>,
    placement: Placement,
    create_params: Params,
    dedication: Option<DedicationRequest>,
) -> Chain {
    let create_orchestrator = Arc::clone(&orchestrator);
    Chain::new(&format!("provision-{}", placement.kind()))
        .step(
            step("create", move |_ctx: ChainContext| {
                let orchestrator = Arc::clone(&create_orchestrator);
                let params = create_params.clone();
                async move {
                    let inner = orchestrator
                        .execute(placement.create_command(), &params)
                        .await?;
                    first_item(&inner, placement.result_key()).map(StepOutcome::Value)
                }
            })
            .output(RESOURCE_KEY),
        )
        .step(step("dedicate", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let dedication = dedication.clone();
            async move {
                let Some(dedication) = dedication else {
                    return Ok(StepOutcome::Skip("dedication not requested".to_string()));
                };
                let Some(id) = ctx.field(RESOURCE_KEY, "id") else {
                    return Ok(StepOutcome::Skip(format!(
                        "{} was created without an id",
                        placement.kind()
                    )));
                };

                let mut params = params([
                    (placement.id_param(), id),
                    ("domainid", dedication.domain_id.as_str()),
                ]);
                if let Some(account) = &dedication.account {
                    params.insert("account".to_string(), account.clone());
                }
                submit_job(
                    orchestrator.as_ref(),
                    placement.dedicate_command(),
                    &params,
                    Some("dedicatedresources"),
                )
                .await
            }
        }))
}

// =============================================================================
// Zone bootstrap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkType {
    Basic,
    Advanced,
}

/// Everything needed to bring a freshly created zone into service.
#[derive(Debug, Clone)]
pub struct ZoneBootstrap {
    pub zone_id: String,
    pub physical_network_id: String,
    pub network_type: NetworkType,
    /// Enable the security group provider. Only honoured for basic zones.
    pub security_groups: bool,
    /// Parameters of the default guest network, if one should be created.
    pub guest_network: Option<Params>,
    pub pod: Params,
}

/// Enable the physical network and its virtual router, then create the
/// default guest network and the first pod.
pub fn zone_bootstrap_chain(orchestrator: Arc<dyn Orchestrator>, zone: ZoneBootstrap) -> Chain {
    let physnet = zone.physical_network_id.clone();

    let enable_network = {
        let orchestrator = Arc::clone(&orchestrator);
        let physnet = physnet.clone();
        step("enable-physical-network", move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let params = params([("id", physnet.as_str()), ("state", "Enabled")]);
            async move {
                submit_job(
                    orchestrator.as_ref(),
                    "updatePhysicalNetwork",
                    &params,
                    Some("physicalnetwork"),
                )
                .await
            }
        })
    };

    let resolve_provider = {
        let orchestrator = Arc::clone(&orchestrator);
        let physnet = physnet.clone();
        step("resolve-virtual-router-provider", move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let physnet = physnet.clone();
            async move {
                find_provider(
                    orchestrator.as_ref(),
                    &physnet,
                    ProviderKind::VirtualRouter.provider_name(),
                )
                .await
                .map(StepOutcome::Value)
            }
        })
        .output("virtual_router_provider")
    };

    let resolve_element = {
        let orchestrator = Arc::clone(&orchestrator);
        step("resolve-virtual-router-element", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let nsp_id = ctx.require_field("virtual_router_provider", "id")?;
                let inner = orchestrator
                    .execute("listVirtualRouterElements", &params([("nspid", nsp_id)]))
                    .await?;
                first_item(&inner, "virtualrouterelement").map(StepOutcome::Value)
            }
        })
        .output("virtual_router_element")
    };

    let enable_element = {
        let orchestrator = Arc::clone(&orchestrator);
        step("enable-virtual-router-element", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let element_id = ctx.require_field("virtual_router_element", "id")?;
                submit_job(
                    orchestrator.as_ref(),
                    "configureVirtualRouterElement",
                    &params([("id", element_id), ("enabled", "true")]),
                    Some("virtualrouterelement"),
                )
                .await
            }
        })
    };

    let enable_provider = {
        let orchestrator = Arc::clone(&orchestrator);
        step("enable-virtual-router-provider", move |ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                let nsp_id = ctx.require_field("virtual_router_provider", "id")?;
                submit_job(
                    orchestrator.as_ref(),
                    "updateNetworkServiceProvider",
                    &params([("id", nsp_id), ("state", "Enabled")]),
                    Some("networkserviceprovider"),
                )
                .await
            }
        })
    };

    let enable_security_groups = {
        let orchestrator = Arc::clone(&orchestrator);
        let physnet = physnet.clone();
        let wanted = zone.network_type == NetworkType::Basic && zone.security_groups;
        step("enable-security-group-provider", move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let physnet = physnet.clone();
            async move {
                if !wanted {
                    return Ok(StepOutcome::Skip(
                        "security groups apply to basic zones only".to_string(),
                    ));
                }
                let provider = find_provider(
                    orchestrator.as_ref(),
                    &physnet,
                    ProviderKind::SecurityGroupProvider.provider_name(),
                )
                .await?;
                let id = provider.get("id").and_then(Value::as_str).ok_or_else(|| {
                    ConsoleError::MalformedResponse("security group provider has no id".to_string())
                })?;
                submit_job(
                    orchestrator.as_ref(),
                    "updateNetworkServiceProvider",
                    &params([("id", id), ("state", "Enabled")]),
                    Some("networkserviceprovider"),
                )
                .await
            }
        })
    };

    let create_network = {
        let orchestrator = Arc::clone(&orchestrator);
        let zone_id = zone.zone_id.clone();
        let guest_network = zone.guest_network.clone();
        step("create-guest-network", move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let zone_id = zone_id.clone();
            let guest_network = guest_network.clone();
            async move {
                let Some(mut params) = guest_network else {
                    return Ok(StepOutcome::Skip("no guest network requested".to_string()));
                };
                params.insert("zoneid".to_string(), zone_id);
                let inner = orchestrator.execute("createNetwork", &params).await?;
                first_item(&inner, "network").map(StepOutcome::Value)
            }
        })
        .output("network")
    };

    let create_pod = {
        let zone_id = zone.zone_id.clone();
        let pod = zone.pod.clone();
        step("create-pod", move |_ctx: ChainContext| {
            let orchestrator = Arc::clone(&orchestrator);
            let mut params = pod.clone();
            params.insert("zoneid".to_string(), zone_id.clone());
            async move {
                let inner = orchestrator.execute("createPod", &params).await?;
                first_item(&inner, "pod").map(StepOutcome::Value)
            }
        })
        .output("pod")
    };

    Chain::new("zone-bootstrap")
        .with_context("zone", json!({ "id": zone.zone_id }))
        .mutates_providers(&physnet)
        .step(enable_network)
        .step(resolve_provider)
        .step(resolve_element)
        .step(enable_element)
        .step(enable_provider)
        .step(enable_security_groups)
        .step(create_network)
        .step(create_pod)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_item_unwraps_lists() {
        let inner = json!({"host": [{"id": "h-1"}, {"id": "h-2"}]});
        assert_eq!(first_item(&inner, "host").unwrap(), json!({"id": "h-1"}));

        let inner = json!({"pod": {"id": "p-1"}});
        assert_eq!(first_item(&inner, "pod").unwrap(), json!({"id": "p-1"}));

        assert!(first_item(&json!({"host": []}), "host").is_err());
        assert!(first_item(&json!({}), "pod").is_err());
    }

    #[test]
    fn test_placement_commands() {
        assert_eq!(Placement::Cluster.create_command(), "addCluster");
        assert_eq!(Placement::Host.dedicate_command(), "dedicateHost");
        assert_eq!(Placement::Pod.id_param(), "podid");
    }

    #[test]
    fn test_zone_bootstrap_step_order() {
        struct Unused;

        #[async_trait::async_trait]
        impl Orchestrator for Unused {
            async fn submit_operation(
                &self,
                _name: &str,
                _params: &Params,
            ) -> Result<crate::orchestrator::JobId> {
                Err(ConsoleError::Cancelled)
            }
            async fn query_job_result(
                &self,
                _job_id: &crate::orchestrator::JobId,
            ) -> Result<crate::orchestrator::JobResultResponse> {
                Err(ConsoleError::Cancelled)
            }
            async fn list_resource(&self, _kind: ResourceKind, _filters: &Params) -> Result<Vec<Value>> {
                Err(ConsoleError::Cancelled)
            }
            async fn execute(&self, _name: &str, _params: &Params) -> Result<Value> {
                Err(ConsoleError::Cancelled)
            }
        }

        let chain = zone_bootstrap_chain(
            Arc::new(Unused),
            ZoneBootstrap {
                zone_id: "z-1".to_string(),
                physical_network_id: "pn-1".to_string(),
                network_type: NetworkType::Advanced,
                security_groups: false,
                guest_network: None,
                pod: Params::new(),
            },
        );
        assert_eq!(
            chain.step_names(),
            vec![
                "enable-physical-network",
                "resolve-virtual-router-provider",
                "resolve-virtual-router-element",
                "enable-virtual-router-element",
                "enable-virtual-router-provider",
                "enable-security-group-provider",
                "create-guest-network",
                "create-pod",
            ]
        );
        assert_eq!(chain.provider_network(), Some("pn-1"));
    }
}
