//! Network service provider registry.
//!
//! Caches the providers of each physical network as fetched from the
//! orchestrator. A refresh always invalidates first and then swaps in a
//! complete new snapshot; refreshes of the same physical network are
//! serialized so two chains never interleave their writes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::actions::{ActionSet, provider_actions};
use crate::error::{ConsoleError, Result};
use crate::orchestrator::{Orchestrator, params};
use crate::resource::{NetworkServiceProvider, ResourceKind, ResourceState};

// =============================================================================
// Provider Kinds
// =============================================================================

/// Provider kinds the console knows how to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProviderKind {
    VirtualRouter,
    VpcVirtualRouter,
    InternalLbVm,
    SecurityGroupProvider,
    Netscaler,
    F5BigIp,
    JuniperSrx,
    NiciraNvp,
    BigSwitchVns,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::VirtualRouter,
        ProviderKind::VpcVirtualRouter,
        ProviderKind::InternalLbVm,
        ProviderKind::SecurityGroupProvider,
        ProviderKind::Netscaler,
        ProviderKind::F5BigIp,
        ProviderKind::JuniperSrx,
        ProviderKind::NiciraNvp,
        ProviderKind::BigSwitchVns,
    ];

    /// Provider name as registered with the orchestrator.
    pub fn provider_name(&self) -> &'static str {
        match self {
            ProviderKind::VirtualRouter => "VirtualRouter",
            ProviderKind::VpcVirtualRouter => "VpcVirtualRouter",
            ProviderKind::InternalLbVm => "InternalLbVm",
            ProviderKind::SecurityGroupProvider => "SecurityGroupProvider",
            ProviderKind::Netscaler => "Netscaler",
            ProviderKind::F5BigIp => "F5BigIp",
            ProviderKind::JuniperSrx => "JuniperSRX",
            ProviderKind::NiciraNvp => "NiciraNvp",
            ProviderKind::BigSwitchVns => "BigSwitchVns",
        }
    }

    /// Command that registers an external device with this provider.
    pub fn device_command(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Netscaler => Some("addNetscalerLoadBalancer"),
            ProviderKind::F5BigIp => Some("addF5LoadBalancer"),
            ProviderKind::JuniperSrx => Some("addSrxFirewall"),
            ProviderKind::NiciraNvp => Some("addNiciraNvpDevice"),
            ProviderKind::BigSwitchVns => Some("addBigSwitchVnsDevice"),
            _ => None,
        }
    }

    /// Key of the device payload in the registration job result.
    pub fn device_result_key(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Netscaler => Some("netscalerloadbalancer"),
            ProviderKind::F5BigIp => Some("f5loadbalancer"),
            ProviderKind::JuniperSrx => Some("srxfirewall"),
            ProviderKind::NiciraNvp => Some("niciranvpdevice"),
            ProviderKind::BigSwitchVns => Some("bigswitchvnsdevice"),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_name())
    }
}

impl FromStr for ProviderKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let alias = match lowered.as_str() {
            "f5" => Some(ProviderKind::F5BigIp),
            "srx" => Some(ProviderKind::JuniperSrx),
            "nicira" => Some(ProviderKind::NiciraNvp),
            "bigswitch" => Some(ProviderKind::BigSwitchVns),
            "securitygroup" => Some(ProviderKind::SecurityGroupProvider),
            _ => None,
        };
        alias
            .or_else(|| {
                ProviderKind::ALL
                    .into_iter()
                    .find(|k| k.provider_name().eq_ignore_ascii_case(&lowered))
            })
            .ok_or_else(|| ConsoleError::Config(format!("unknown provider '{}'", s)))
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// All providers of one physical network at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub physical_network_id: String,
    pub providers: BTreeMap<String, NetworkServiceProvider>,
    pub fetched_at: String,
}

impl ProviderSnapshot {
    pub fn get(&self, name: &str) -> Option<&NetworkServiceProvider> {
        self.providers.get(name)
    }

    /// The provider, or an absent placeholder when it was never created.
    pub fn provider_or_absent(&self, name: &str) -> NetworkServiceProvider {
        self.providers
            .get(name)
            .cloned()
            .unwrap_or_else(|| NetworkServiceProvider::absent(name, &self.physical_network_id))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Provider cache keyed by physical network id.
#[derive(Default)]
pub struct ProviderRegistry {
    snapshots: RwLock<HashMap<String, Arc<ProviderSnapshot>>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    active: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn writer(&self, physical_network_id: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        Arc::clone(
            writers
                .entry(physical_network_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the cached snapshot of a physical network.
    pub async fn invalidate(&self, physical_network_id: &str) {
        debug!(physical_network_id = %physical_network_id, "Invalidating provider snapshot");
        self.snapshots.write().await.remove(physical_network_id);
    }

    /// Forget the writer lock of a network once nobody else holds or awaits it.
    async fn release_writer(&self, physical_network_id: &str, writer: Arc<Mutex<()>>) {
        let mut writers = self.writers.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&writer) == 2 {
            writers.remove(physical_network_id);
        }
        // Drop our reference before unlocking so the next caller counts right.
        drop(writer);
    }

    /// Invalidate, refetch and store the providers of a physical network.
    ///
    /// If the fetch fails the network stays invalidated.
    pub async fn refresh(
        &self,
        orchestrator: &dyn Orchestrator,
        physical_network_id: &str,
    ) -> Result<Arc<ProviderSnapshot>> {
        let writer = self.writer(physical_network_id).await;
        let result = {
            let _guard = writer.lock().await;
            self.refetch(orchestrator, physical_network_id).await
        };
        self.release_writer(physical_network_id, writer).await;
        result
    }

    async fn refetch(
        &self,
        orchestrator: &dyn Orchestrator,
        physical_network_id: &str,
    ) -> Result<Arc<ProviderSnapshot>> {
        self.invalidate(physical_network_id).await;

        let records = orchestrator
            .list_resource(
                ResourceKind::NetworkServiceProvider,
                &params([("physicalnetworkid", physical_network_id)]),
            )
            .await?;

        let mut providers = BTreeMap::new();
        for raw in &records {
            match ResourceState::from_raw(ResourceKind::NetworkServiceProvider, raw) {
                Ok(ResourceState::NetworkServiceProvider(mut nsp)) => {
                    if nsp.physical_network_id.is_empty() {
                        nsp.physical_network_id = physical_network_id.to_string();
                    }
                    providers.insert(nsp.name.clone(), nsp);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable provider record"),
            }
        }

        let snapshot = Arc::new(ProviderSnapshot {
            physical_network_id: physical_network_id.to_string(),
            providers,
            fetched_at: Utc::now().to_rfc3339(),
        });
        info!(
            physical_network_id = %physical_network_id,
            providers = snapshot.providers.len(),
            "Refreshed provider snapshot"
        );

        self.snapshots
            .write()
            .await
            .insert(physical_network_id.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Make `physical_network_id` the active network and rebuild its snapshot.
    /// The previously active network's snapshot is dropped.
    pub async fn activate(
        &self,
        orchestrator: &dyn Orchestrator,
        physical_network_id: &str,
    ) -> Result<Arc<ProviderSnapshot>> {
        let previous = self
            .active
            .write()
            .await
            .replace(physical_network_id.to_string());
        if let Some(previous) = previous.filter(|p| p != physical_network_id) {
            self.invalidate(&previous).await;
        }
        self.refresh(orchestrator, physical_network_id).await
    }

    pub async fn active(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    pub async fn snapshot(&self, physical_network_id: &str) -> Option<Arc<ProviderSnapshot>> {
        self.snapshots.read().await.get(physical_network_id).cloned()
    }

    /// Cached provider, if the network has been fetched and the provider exists.
    pub async fn provider(
        &self,
        physical_network_id: &str,
        name: &str,
    ) -> Option<NetworkServiceProvider> {
        self.snapshot(physical_network_id)
            .await
            .and_then(|s| s.get(name).cloned())
    }

    /// Actions on a provider of a physical network. A provider that is not
    /// cached offers only `add`.
    pub async fn provider_actions(&self, physical_network_id: &str, name: &str) -> ActionSet {
        let nsp = self
            .provider(physical_network_id, name)
            .await
            .unwrap_or_else(|| NetworkServiceProvider::absent(name, physical_network_id));
        provider_actions(&nsp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::orchestrator::{JobId, JobResultResponse, Params};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lists a fixed set of providers per physical network.
    struct Listing {
        by_network: HashMap<String, Vec<Value>>,
        lists: AtomicUsize,
    }

    impl Listing {
        fn new(by_network: Vec<(&str, Vec<Value>)>) -> Self {
            Self {
                by_network: by_network
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                lists: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Orchestrator for Listing {
        async fn submit_operation(&self, _name: &str, _params: &Params) -> Result<JobId> {
            Err(ConsoleError::Transport("not scripted".to_string()))
        }

        async fn query_job_result(&self, _job_id: &JobId) -> Result<JobResultResponse> {
            Err(ConsoleError::Transport("not scripted".to_string()))
        }

        async fn list_resource(&self, _kind: ResourceKind, filters: &Params) -> Result<Vec<Value>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            let physnet = filters.get("physicalnetworkid").cloned().unwrap_or_default();
            self.by_network
                .get(&physnet)
                .cloned()
                .ok_or_else(|| ConsoleError::Http {
                    status: 431,
                    message: format!("physical network {} not found", physnet),
                })
        }

        async fn execute(&self, _name: &str, _params: &Params) -> Result<Value> {
            Err(ConsoleError::Transport("not scripted".to_string()))
        }
    }

    fn listing() -> Listing {
        Listing::new(vec![
            (
                "pn-1",
                vec![
                    json!({"id": "nsp-vr", "name": "VirtualRouter", "state": "Enabled", "physicalnetworkid": "pn-1"}),
                    json!({"id": "nsp-ns", "name": "Netscaler", "state": "Disabled", "physicalnetworkid": "pn-1"}),
                ],
            ),
            (
                "pn-2",
                vec![json!({"id": "nsp-f5", "name": "F5BigIp", "state": "Enabled"})],
            ),
        ])
    }

    #[tokio::test]
    async fn test_refresh_builds_snapshot() {
        let orchestrator = listing();
        let registry = ProviderRegistry::new();

        let snapshot = registry.refresh(&orchestrator, "pn-1").await.unwrap();
        assert_eq!(snapshot.providers.len(), 2);
        assert_eq!(snapshot.get("Netscaler").unwrap().id, "nsp-ns");
        assert!(!snapshot.provider_or_absent("F5BigIp").is_present());
    }

    #[tokio::test]
    async fn test_provider_actions_from_cache() {
        let orchestrator = listing();
        let registry = ProviderRegistry::new();
        registry.refresh(&orchestrator, "pn-1").await.unwrap();

        assert_eq!(
            registry.provider_actions("pn-1", "VirtualRouter").await,
            ActionSet::from([Action::Disable, Action::Destroy, Action::Add])
        );
        assert_eq!(
            registry.provider_actions("pn-1", "Netscaler").await,
            ActionSet::from([Action::Enable, Action::Destroy, Action::Add])
        );
        assert_eq!(
            registry.provider_actions("pn-1", "NiciraNvp").await,
            ActionSet::from([Action::Add])
        );
    }

    #[tokio::test]
    async fn test_activate_drops_previous_network() {
        let orchestrator = listing();
        let registry = ProviderRegistry::new();

        registry.activate(&orchestrator, "pn-1").await.unwrap();
        assert!(registry.snapshot("pn-1").await.is_some());

        let snapshot = registry.activate(&orchestrator, "pn-2").await.unwrap();
        assert_eq!(registry.active().await.as_deref(), Some("pn-2"));
        assert!(registry.snapshot("pn-1").await.is_none());
        // Filled from the filter when the record omits it.
        assert_eq!(snapshot.get("F5BigIp").unwrap().physical_network_id, "pn-2");
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_network_invalidated() {
        let orchestrator = listing();
        let registry = ProviderRegistry::new();
        registry.refresh(&orchestrator, "pn-1").await.unwrap();

        let mut broken = listing();
        broken.by_network.remove("pn-1");
        assert!(registry.refresh(&broken, "pn-1").await.is_err());
        assert!(registry.snapshot("pn-1").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_are_serialized() {
        let orchestrator = Arc::new(listing());
        let registry = Arc::new(ProviderRegistry::new());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.refresh(orchestrator.as_ref(), "pn-1").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(orchestrator.lists.load(Ordering::SeqCst), 8);
        assert_eq!(registry.snapshot("pn-1").await.unwrap().providers.len(), 2);
        assert!(registry.writers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_writer_locks_released_after_refresh() {
        let orchestrator = listing();
        let registry = ProviderRegistry::new();

        registry.refresh(&orchestrator, "pn-1").await.unwrap();
        registry.refresh(&orchestrator, "pn-2").await.unwrap();
        // Unknown network, the fetch fails.
        assert!(registry.refresh(&orchestrator, "pn-3").await.is_err());

        assert!(registry.writers.lock().await.is_empty());
        assert!(registry.snapshot("pn-1").await.is_some());
        assert!(registry.snapshot("pn-2").await.is_some());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("netscaler".parse::<ProviderKind>().unwrap(), ProviderKind::Netscaler);
        assert_eq!("JuniperSRX".parse::<ProviderKind>().unwrap(), ProviderKind::JuniperSrx);
        assert_eq!("srx".parse::<ProviderKind>().unwrap(), ProviderKind::JuniperSrx);
        assert!("paloalto".parse::<ProviderKind>().is_err());
    }
}
